use inkbridge_core::db::open_db_in_memory;
use inkbridge_core::{
    ActionKind, BlockId, EditError, FixtureOracle, LineBounds, MergeRequest, PersistenceGateway,
    RecognitionLine, ReconcileConfig, ServiceError, SplitRequest, SqliteGateway, Stroke,
    StrokePoint, TranscriptionService,
};
use rusqlite::Connection;

const PAGE: &str = "page-1";

fn stroke(id: i64, top: f64, bottom: f64) -> Stroke {
    Stroke::with_id(
        id,
        vec![StrokePoint::new(0.0, top, id), StrokePoint::new(3.0, bottom, id + 1)],
    )
}

fn two_lines() -> Vec<Stroke> {
    let mut strokes: Vec<Stroke> = (1..=5).map(|id| stroke(id * 10, 0.0, 10.0)).collect();
    strokes.extend((6..=9).map(|id| stroke(id * 10, 20.0, 30.0)));
    strokes
}

fn service(conn: &Connection) -> TranscriptionService<SqliteGateway<'_>, FixtureOracle> {
    TranscriptionService::new(
        SqliteGateway::try_new(conn).unwrap(),
        FixtureOracle::new(vec![
            RecognitionLine::new("Buy milk", Some(LineBounds::new(0.0, 10.0))),
            RecognitionLine::new("Call Sam", Some(LineBounds::new(20.0, 30.0))),
        ]),
        ReconcileConfig::default(),
    )
    .unwrap()
}

/// One block spanning both lines, as after a merge.
fn merged_page(service: &TranscriptionService<SqliteGateway<'_>, FixtureOracle>) -> BlockId {
    service.transcribe_new(PAGE, &two_lines()).unwrap();
    let blocks = service.gateway().list_blocks(PAGE).unwrap();
    service
        .merge_blocks(
            PAGE,
            &MergeRequest {
                survivor: blocks[0].id,
                absorbed: blocks[1].id,
                merged_content: None,
            },
        )
        .unwrap()
        .retained
        .id
}

#[test]
fn merge_persists_strokes_and_removes_absorbed_block() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let merged_id = merged_page(&service);

    let blocks = service.gateway().list_blocks(PAGE).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].id, merged_id);
    assert_eq!(blocks[0].content, "Buy milk\nCall Sam");
    assert_eq!(blocks[0].bounds_hint, Some(LineBounds::new(0.0, 30.0)));
    assert!(service
        .gateway()
        .read_strokes(PAGE)
        .unwrap()
        .iter()
        .all(|stroke| stroke.block_ref == Some(merged_id)));

    let outcome = service.refresh_page(PAGE, &[], &[]).unwrap();
    assert_eq!(outcome.plan.count(ActionKind::Skip), 1);
    assert!(outcome.plan.is_noop());
}

#[test]
fn split_then_refresh_is_stable() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let merged_id = merged_page(&service);

    let outcome = service
        .split_block(
            PAGE,
            &SplitRequest {
                block_id: merged_id,
                boundary_y: 15.0,
                upper_content: "Buy milk".to_string(),
                lower_content: "Call Sam".to_string(),
            },
        )
        .unwrap();
    let lower = outcome.created.unwrap();
    assert_eq!(outcome.retained.id, merged_id);
    assert_eq!(outcome.retained.bounds_hint, Some(LineBounds::new(0.0, 15.0)));
    assert_eq!(lower.canonical_snapshot, "Call Sam");

    let strokes = service.gateway().read_strokes(PAGE).unwrap();
    assert_eq!(
        strokes
            .iter()
            .filter(|stroke| stroke.block_ref == Some(lower.id))
            .count(),
        4
    );

    let refresh = service.refresh_page(PAGE, &[], &[]).unwrap();
    assert_eq!(refresh.plan.count(ActionKind::Skip), 2);
    assert!(refresh.plan.is_noop());
}

#[test]
fn split_without_strokes_below_is_rejected_and_nothing_changes() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let merged_id = merged_page(&service);
    let before = service.gateway().list_blocks(PAGE).unwrap();

    let err = service
        .split_block(
            PAGE,
            &SplitRequest {
                block_id: merged_id,
                boundary_y: 99.0,
                upper_content: "all".to_string(),
                lower_content: "none".to_string(),
            },
        )
        .unwrap_err();

    assert!(matches!(err, ServiceError::Edit(EditError::EmptySplitSide(_))));
    assert_eq!(service.gateway().list_blocks(PAGE).unwrap(), before);
}

#[test]
fn merge_with_block_from_another_page_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let merged_id = merged_page(&service);
    service.transcribe_new("page-2", &two_lines()).unwrap();
    let foreign = service.gateway().list_blocks("page-2").unwrap()[0].id;

    let err = service
        .merge_blocks(
            PAGE,
            &MergeRequest {
                survivor: merged_id,
                absorbed: foreign,
                merged_content: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::Edit(EditError::BlockNotFound(id)) if id == foreign));
}

#[test]
fn split_keeps_user_decorations_through_refresh() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let merged_id = merged_page(&service);

    let outcome = service
        .split_block(
            PAGE,
            &SplitRequest {
                block_id: merged_id,
                boundary_y: 15.0,
                upper_content: "TODO Buy milk".to_string(),
                lower_content: "Call Sam #work".to_string(),
            },
        )
        .unwrap();
    assert_eq!(outcome.retained.canonical_snapshot, "Buy milk");
    assert_eq!(outcome.created.unwrap().canonical_snapshot, "Call Sam");

    let refresh = service.refresh_page(PAGE, &[], &[]).unwrap();
    assert_eq!(refresh.plan.count(ActionKind::Skip), 2);
    assert_eq!(refresh.plan.count(ActionKind::Update), 0);

    let contents: Vec<String> = service
        .gateway()
        .list_blocks(PAGE)
        .unwrap()
        .into_iter()
        .map(|block| block.content)
        .collect();
    assert_eq!(contents, vec!["TODO Buy milk", "Call Sam #work"]);
}
