use inkbridge_core::db::open_db_in_memory;
use inkbridge_core::{
    ActionKind, AnnotationBlock, BlockAction, FixtureOracle, LineBounds, MergeRequest,
    PersistenceGateway, RecognitionLine, ReconcileConfig, SqliteGateway, Stroke, StrokePoint,
    TranscriptionService,
};
use rusqlite::Connection;

const PAGE: &str = "page-1";

fn stroke(id: i64, top: f64, bottom: f64) -> Stroke {
    Stroke::with_id(
        id,
        vec![
            StrokePoint::new(id as f64, top, id * 10),
            StrokePoint::new(id as f64 + 1.0, bottom, id * 10 + 5),
        ],
    )
}

fn line(text: &str, min_y: f64, max_y: f64) -> RecognitionLine {
    RecognitionLine::new(text, Some(LineBounds::new(min_y, max_y)))
}

/// S1-S5 on the first line, S6-S9 on the second.
fn first_strokes() -> Vec<Stroke> {
    let mut strokes: Vec<Stroke> = (1..=5).map(|id| stroke(id, 0.0, 10.0)).collect();
    strokes.extend((6..=9).map(|id| stroke(id, 20.0, 30.0)));
    strokes
}

/// S10-S12 on a third line.
fn later_strokes() -> Vec<Stroke> {
    (10..=12).map(|id| stroke(id, 40.0, 50.0)).collect()
}

fn page_oracle() -> FixtureOracle {
    FixtureOracle::new(vec![
        line("Buy milk", 0.0, 10.0),
        line("Call Sam", 20.0, 30.0),
        line("Email Bob", 40.0, 50.0),
    ])
}

fn service(conn: &Connection) -> TranscriptionService<SqliteGateway<'_>, FixtureOracle> {
    TranscriptionService::new(
        SqliteGateway::try_new(conn).unwrap(),
        page_oracle(),
        ReconcileConfig::default(),
    )
    .unwrap()
}

fn blocks(
    service: &TranscriptionService<SqliteGateway<'_>, FixtureOracle>,
) -> Vec<AnnotationBlock> {
    service.gateway().list_blocks(PAGE).unwrap()
}

#[test]
fn first_pass_creates_one_block_per_line() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let outcome = service.transcribe_new(PAGE, &first_strokes()).unwrap();

    assert_eq!(outcome.ingested, 9);
    assert_eq!(outcome.recognized, 9);
    assert_eq!(outcome.plan.actions.len(), 2);
    let sizes: Vec<usize> = outcome
        .plan
        .actions
        .iter()
        .map(|action| {
            assert_eq!(action.kind(), ActionKind::Create);
            action.touched_strokes().len()
        })
        .collect();
    assert_eq!(sizes, vec![5, 4]);
    assert_eq!(outcome.report.created, 2);

    let stored = blocks(&service);
    let contents: Vec<&str> = stored.iter().map(|block| block.content.as_str()).collect();
    assert_eq!(contents, vec!["Buy milk", "Call Sam"]);
    let strokes = service.gateway().read_strokes(PAGE).unwrap();
    assert!(strokes.iter().all(|stroke| stroke.block_ref.is_some()));
    assert_eq!(
        strokes
            .iter()
            .filter(|stroke| stroke.block_ref == Some(stored[0].id))
            .count(),
        5
    );
}

#[test]
fn rerun_without_new_strokes_only_skips() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.transcribe_new(PAGE, &first_strokes()).unwrap();
    let before = blocks(&service);

    let outcome = service.refresh_page(PAGE, &[], &first_strokes()).unwrap();

    assert_eq!(outcome.plan.count(ActionKind::Skip), 2);
    assert_eq!(outcome.plan.actions.len(), 2);
    assert!(outcome.plan.is_noop());
    assert_eq!(outcome.ingested, 0);
    assert_eq!(blocks(&service), before);

    let appended = service.transcribe_new(PAGE, &[]).unwrap();
    assert_eq!(appended.recognized, 0);
    assert_eq!(appended.plan.mutations().count(), 0);
}

#[test]
fn new_strokes_after_merge_only_create_and_leave_merged_block_alone() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.transcribe_new(PAGE, &first_strokes()).unwrap();
    let first = blocks(&service);

    let merged = service
        .merge_blocks(
            PAGE,
            &MergeRequest {
                survivor: first[0].id,
                absorbed: first[1].id,
                merged_content: Some("Buy milk and call Sam".to_string()),
            },
        )
        .unwrap()
        .retained;
    assert_eq!(merged.canonical_snapshot, "Buy milk Call Sam");

    let outcome = service.transcribe_new(PAGE, &later_strokes()).unwrap();

    assert_eq!(outcome.recognized, 3);
    assert_eq!(outcome.plan.mutations().count(), 1);
    match outcome.plan.mutations().next() {
        Some(BlockAction::Create(create)) => {
            assert_eq!(create.block.content, "Email Bob");
            assert_eq!(create.strokes, vec![10, 11, 12]);
        }
        other => panic!("unexpected action: {other:?}"),
    }
    let untouched = outcome.plan.action_for(merged.id).unwrap();
    assert!(!untouched.is_mutation());
    assert!(untouched.touched_strokes().is_empty());

    let stored = blocks(&service);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content, "Buy milk and call Sam");
}

#[test]
fn user_annotation_survives_full_rerecognition() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.transcribe_new(PAGE, &first_strokes()).unwrap();
    let first = blocks(&service);
    let merged = service
        .merge_blocks(
            PAGE,
            &MergeRequest {
                survivor: first[0].id,
                absorbed: first[1].id,
                merged_content: Some("Buy milk and call Sam".to_string()),
            },
        )
        .unwrap()
        .retained;
    service.transcribe_new(PAGE, &later_strokes()).unwrap();

    service
        .gateway()
        .update_block_content(merged.id, "Buy milk, call Sam (done)", &merged.properties())
        .unwrap();

    let outcome = service.refresh_page(PAGE, &[], &[]).unwrap();

    assert!(matches!(
        outcome.plan.action_for(merged.id),
        Some(BlockAction::Skip { lines, .. }) if lines.len() == 2
    ));
    assert_eq!(outcome.plan.mutations().count(), 0);
    let stored = blocks(&service);
    assert_eq!(stored[0].content, "Buy milk, call Sam (done)");
    assert_eq!(stored[0].canonical_snapshot, "Buy milk Call Sam");
}

#[test]
fn changed_recognition_updates_content_and_keeps_decorations() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.transcribe_new(PAGE, &first_strokes()).unwrap();
    let first = blocks(&service)[0].clone();
    service
        .gateway()
        .update_block_content(first.id, "TODO Buy milk #errand", &first.properties())
        .unwrap();

    let rewritten = TranscriptionService::new(
        SqliteGateway::try_new(&conn).unwrap(),
        FixtureOracle::new(vec![
            line("Buy oat milk", 0.0, 10.0),
            line("Call Sam", 20.0, 30.0),
        ]),
        ReconcileConfig::default(),
    )
    .unwrap();
    let outcome = rewritten.refresh_page(PAGE, &[], &[]).unwrap();

    assert_eq!(outcome.report.updated, 1);
    assert_eq!(outcome.report.skipped, 1);
    let stored = blocks(&service);
    assert_eq!(stored[0].content, "TODO Buy oat milk #errand");
    assert_eq!(stored[0].canonical_snapshot, "Buy oat milk");
}

#[test]
fn erasing_all_strokes_of_a_block_deletes_only_that_block() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.transcribe_new(PAGE, &first_strokes()).unwrap();
    let first = blocks(&service);

    assert_eq!(service.delete_strokes(PAGE, &[1, 2, 3, 4, 5, 6]).unwrap(), 6);
    let outcome = service.refresh_page(PAGE, &[], &[]).unwrap();

    assert_eq!(outcome.plan.count(ActionKind::Delete), 1);
    assert!(matches!(
        outcome.plan.action_for(first[0].id),
        Some(BlockAction::Delete { .. })
    ));
    assert!(!outcome.plan.action_for(first[1].id).unwrap().is_mutation());
    assert_eq!(blocks(&service), vec![first[1].clone()]);

    let rerun = service.refresh_page(PAGE, &[], &[]).unwrap();
    assert_eq!(rerun.plan.count(ActionKind::Delete), 0);
}

#[test]
fn refresh_releases_strokes_pointing_at_missing_blocks() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let ghost = AnnotationBlock::new(PAGE, "ghost").id;
    let cached: Vec<Stroke> = later_strokes()
        .into_iter()
        .map(|mut stroke| {
            stroke.block_ref = Some(ghost);
            stroke
        })
        .collect();

    let outcome = service.refresh_page(PAGE, &cached, &[]).unwrap();

    assert_eq!(outcome.ingested, 3);
    assert_eq!(outcome.report.created, 1);
    let stored = blocks(&service);
    assert_eq!(stored.len(), 1);
    assert!(service
        .gateway()
        .read_strokes(PAGE)
        .unwrap()
        .iter()
        .all(|stroke| stroke.block_ref == Some(stored[0].id)));
}
