use super::*;

#[test]
fn builtin_catalog_has_nine_rows_of_five() {
    let catalog = TransformCatalog::builtin().expect("builtin catalog");
    assert_eq!(catalog.rows().len(), 9);
    assert!(catalog.rows().iter().all(|row| row.len() == 5));
    assert_eq!(catalog.len(), 45);
}

#[test]
fn lookup_resolves_layer_and_unit() {
    let catalog = TransformCatalog::builtin().expect("builtin catalog");
    let entry = catalog.lookup("🏠 1").expect("house one");
    assert_eq!(entry.layer, "mixed4d_3x3_bottleneck_pre_relu");
    assert_eq!(entry.unit, 65);

    let err = catalog.lookup("🏠 9").expect_err("unknown label");
    assert!(matches!(err, BotError::NotFound { label } if label == "🏠 9"));
}

#[test]
fn control_labels_are_not_catalog_entries() {
    let catalog = TransformCatalog::builtin().expect("builtin catalog");
    for label in [COMMAND_RESET, COMMAND_RETRY, COMMAND_GET_ORIGINAL_PHOTO] {
        assert!(catalog.lookup(label).is_err());
    }
}

#[test]
fn keyboard_wraps_rows_with_control_buttons() {
    let catalog = TransformCatalog::builtin().expect("builtin catalog");
    let keyboard = catalog.keyboard();
    assert_eq!(keyboard.len(), 11);
    assert_eq!(keyboard[0], vec![COMMAND_RESET, COMMAND_RETRY]);
    assert_eq!(keyboard[1][0], "🏠 1");
    assert_eq!(keyboard[10], vec![COMMAND_GET_ORIGINAL_PHOTO]);
}

#[test]
fn rejects_duplicate_reserved_and_empty_labels() {
    let dup = TransformCatalog::new(vec![
        vec![CatalogEntry::new("a", "mixed4c_3x3_pre_relu", 1)],
        vec![CatalogEntry::new("a", "mixed5a_1x1_pre_relu", 1)],
    ]);
    assert_eq!(dup.expect_err("dup"), CatalogError::DuplicateLabel("a".into()));

    let reserved = TransformCatalog::new(vec![vec![CatalogEntry::new(
        COMMAND_RETRY,
        "mixed4c_3x3_pre_relu",
        1,
    )]]);
    assert!(matches!(reserved, Err(CatalogError::ReservedLabel(_))));

    let empty_row = TransformCatalog::new(vec![vec![]]);
    assert_eq!(empty_row.expect_err("row"), CatalogError::EmptyRow { row: 0 });

    assert_eq!(
        TransformCatalog::new(Vec::new()).expect_err("empty"),
        CatalogError::Empty
    );
}

#[test]
fn same_unit_may_appear_on_different_layers() {
    let catalog = TransformCatalog::new(vec![vec![
        CatalogEntry::new("x", "mixed4c_3x3_pre_relu", 1),
        CatalogEntry::new("y", "mixed5a_1x1_pre_relu", 1),
    ]])
    .expect("catalog");
    assert_eq!(catalog.len(), 2);
}

#[test]
fn classify_maps_text_onto_events() {
    let catalog = TransformCatalog::builtin().expect("builtin catalog");
    assert_eq!(catalog.classify("/start"), TransformEvent::Start);
    assert_eq!(catalog.classify(COMMAND_RESET), TransformEvent::Reset);
    assert_eq!(
        catalog.classify(COMMAND_RETRY),
        TransformEvent::Command {
            label: COMMAND_RETRY.to_string()
        }
    );
    assert_eq!(
        catalog.classify("Stones"),
        TransformEvent::Command {
            label: "Stones".to_string()
        }
    );
    assert_eq!(
        catalog.classify("hello"),
        TransformEvent::Unknown {
            text: Some("hello".to_string())
        }
    );
}
