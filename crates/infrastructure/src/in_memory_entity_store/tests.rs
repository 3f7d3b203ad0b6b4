use std::sync::Arc;

use rowgate_application::{
    ActorRoleResolver, DuplicationService, EntityAccessGuard, EntityStore, FetchOptions,
    FilterOperator, NewRow, PermissionEngine, RelationOptions, RelationRequest, RelationResolver,
    ReorderService, RowQuery, RowVisibilityPredicate, SearchTerm, TableCatalog,
};
use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::{GrantState, RelatedEntities, Schema, SortDirection};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::InMemoryEntityStore;

const DOC: &str = r#"
{
    "roles": {
        "public": {"description": "everyone"},
        "member": {"description": "signed-up listener", "parents": ["public"]},
        "editor": {"description": "catalog editor", "parents": ["member"]}
    },
    "tables": {
        "Organization": {
            "fields": {"name": {"type": "text"}},
            "grants": {"editor": ["read"]}
        },
        "Recording": {
            "fields": {"name": {"type": "text"}},
            "grants": {"public": ["read"]}
        },
        "MusicAlbum": {
            "fields": {
                "name": {"type": "text"},
                "releaseYear": {"type": "number"},
                "secretNote": {
                    "type": "text",
                    "grant": {"editor": ["read", "create", "update"]}
                },
                "popularity": {"type": "number", "computed": true},
                "byArtist": {"type": "relation", "relation": "Organization"}
            },
            "grants": {
                "member": ["read", "create", "update", "delete"],
                "editor": ["publish"]
            }
        },
        "MusicAlbumTrack": {
            "fields": {
                "name": {"type": "text"},
                "position": {"type": "number"},
                "idMusicAlbum": {
                    "type": "relation",
                    "relation": "MusicAlbum",
                    "arrayName": "track",
                    "relationshipStrength": "Strong",
                    "defaultSort": [{"field": "position", "order": "asc"}],
                    "orderable": "position"
                },
                "idRecording": {"type": "relation", "relation": "Recording"}
            },
            "grants": {"member": ["read", "create", "update"]}
        }
    }
}
"#;

struct Harness {
    store: Arc<InMemoryEntityStore>,
    guard: EntityAccessGuard,
    reorder: ReorderService,
    duplication: DuplicationService,
}

fn harness() -> Harness {
    harness_for(DOC)
}

fn harness_for(doc: &str) -> Harness {
    let schema = match Schema::from_json_str(doc) {
        Ok(schema) => Arc::new(schema),
        Err(error) => panic!("schema should load: {error}"),
    };
    let store = Arc::new(InMemoryEntityStore::new());

    let catalog = TableCatalog::new(schema.clone());
    let roles = ActorRoleResolver::new(schema.clone());
    let permissions = PermissionEngine::new(catalog.clone(), roles);
    let visibility = RowVisibilityPredicate::new(schema.clone());
    let relations = RelationResolver::new(
        catalog.clone(),
        permissions.clone(),
        visibility.clone(),
        store.clone(),
    );
    let guard = EntityAccessGuard::new(
        catalog.clone(),
        permissions.clone(),
        visibility.clone(),
        relations,
        store.clone(),
    );
    let reorder = ReorderService::new(catalog.clone(), permissions.clone(), store.clone());
    let duplication = DuplicationService::new(catalog, permissions, visibility, store.clone());

    Harness {
        store,
        guard,
        reorder,
        duplication,
    }
}

fn ok<T>(result: AppResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("unexpected error: {error}"),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture data must be an object"),
    }
}

async fn seed(
    store: &InMemoryEntityStore,
    table: &str,
    owner: Option<&str>,
    grant: GrantState,
    data: Value,
) -> Uuid {
    ok(store
        .insert_row(
            table,
            NewRow {
                owner_subject: owner.map(str::to_owned),
                grant_state: grant,
                data: object(data),
            },
        )
        .await)
    .id()
}

fn member() -> Actor {
    Actor::authenticated("user-m", "member")
}

fn other_member() -> Actor {
    Actor::authenticated("user-o", "member")
}

fn editor() -> Actor {
    Actor::authenticated("user-e", "editor")
}

async fn seed_album(harness: &Harness, name: &str, grant: GrantState, owner: Option<&str>) -> Uuid {
    seed(
        &harness.store,
        "MusicAlbum",
        owner,
        grant,
        json!({"name": name, "releaseYear": 1957, "secretNote": "keep quiet"}),
    )
    .await
}

#[tokio::test]
async fn fetch_many_applies_row_visibility() {
    let harness = harness();
    seed_album(&harness, "own draft", GrantState::Draft, Some("user-m")).await;
    seed_album(&harness, "foreign draft", GrantState::Draft, Some("user-o")).await;
    seed_album(&harness, "shared", GrantState::Shared, None).await;
    seed_album(
        &harness,
        "published",
        GrantState::Published("member".to_owned()),
        None,
    )
    .await;
    seed_album(&harness, "open", GrantState::Public, None).await;

    let outcome = ok(harness
        .guard
        .fetch_many(&member(), "MusicAlbum", &FetchOptions::default())
        .await);
    assert_eq!(outcome.pagination.total, 4);
    assert!(
        !outcome
            .rows
            .iter()
            .any(|row| row.field("name") == Some(&json!("foreign draft")))
    );
}

#[tokio::test]
async fn fetch_one_distinguishes_missing_from_hidden() {
    let harness = harness();
    let hidden = seed_album(&harness, "foreign draft", GrantState::Draft, Some("user-o")).await;

    let missing = harness
        .guard
        .fetch_one(&member(), "MusicAlbum", Uuid::new_v4(), &FetchOptions::default())
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let forbidden = harness
        .guard
        .fetch_one(&member(), "MusicAlbum", hidden, &FetchOptions::default())
        .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn table_names_resolve_case_insensitively() {
    let harness = harness();
    let id = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "musicalbum", id, &FetchOptions::default())
        .await);
    assert_eq!(outcome.row.table(), "MusicAlbum");
}

#[tokio::test]
async fn field_grants_strip_ungranted_fields_per_actor() {
    let harness = harness();
    let id = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    let seen_by_member = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", id, &FetchOptions::default())
        .await);
    assert!(seen_by_member.row.field("secretNote").is_none());
    assert!(seen_by_member.row.field("name").is_some());

    let seen_by_editor = ok(harness
        .guard
        .fetch_one(&editor(), "MusicAlbum", id, &FetchOptions::default())
        .await);
    assert!(seen_by_editor.row.field("secretNote").is_some());
}

#[tokio::test]
async fn default_relations_follow_readability_and_strength() {
    let harness = harness();
    let artist = seed(
        &harness.store,
        "Organization",
        None,
        GrantState::Public,
        json!({"name": "John Coltrane"}),
    )
    .await;
    let album = seed(
        &harness.store,
        "MusicAlbum",
        None,
        GrantState::Public,
        json!({"name": "Blue Train", "byArtist": artist.to_string()}),
    )
    .await;
    seed(
        &harness.store,
        "MusicAlbumTrack",
        None,
        GrantState::Public,
        json!({"name": "Moment's Notice", "position": 2, "idMusicAlbum": album.to_string()}),
    )
    .await;
    seed(
        &harness.store,
        "MusicAlbumTrack",
        None,
        GrantState::Public,
        json!({"name": "Blue Train", "position": 1, "idMusicAlbum": album.to_string()}),
    )
    .await;

    // Members cannot read Organization, so the artist edge is omitted while
    // the strong track collection still loads, ordered by position.
    let seen_by_member = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    assert!(!seen_by_member.row.relations().contains_key("byArtist"));
    match seen_by_member.row.relations().get("track") {
        Some(RelatedEntities::Many(tracks)) => {
            let names: Vec<Option<&Value>> =
                tracks.iter().map(|track| track.field("name")).collect();
            assert_eq!(
                names,
                vec![Some(&json!("Blue Train")), Some(&json!("Moment's Notice"))]
            );
        }
        other => panic!("expected track collection, got {other:?}"),
    }

    let seen_by_editor = ok(harness
        .guard
        .fetch_one(&editor(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    match seen_by_editor.row.relations().get("byArtist") {
        Some(RelatedEntities::One(target)) => {
            assert_eq!(target.field("name"), Some(&json!("John Coltrane")));
        }
        other => panic!("expected artist target, got {other:?}"),
    }
}

#[tokio::test]
async fn strong_collections_need_no_table_read_on_the_child() {
    // Liner notes are not readable as a table, yet public ones still load
    // inside their album's strong collection.
    let doc = r#"
    {
        "roles": {
            "public": {"description": "everyone"},
            "member": {"description": "signed-up listener", "parents": ["public"]}
        },
        "tables": {
            "MusicAlbum": {
                "fields": {"name": {"type": "text"}},
                "grants": {"member": ["read"]}
            },
            "LinerNote": {
                "fields": {
                    "body": {"type": "text"},
                    "idMusicAlbum": {
                        "type": "relation",
                        "relation": "MusicAlbum",
                        "arrayName": "note",
                        "relationshipStrength": "Strong"
                    }
                }
            }
        }
    }
    "#;
    let harness = harness_for(doc);
    let album = seed(
        &harness.store,
        "MusicAlbum",
        None,
        GrantState::Public,
        json!({"name": "Blue Train"}),
    )
    .await;
    seed(
        &harness.store,
        "LinerNote",
        None,
        GrantState::Public,
        json!({"body": "recorded in one afternoon", "idMusicAlbum": album.to_string()}),
    )
    .await;
    seed(
        &harness.store,
        "LinerNote",
        None,
        GrantState::Shared,
        json!({"body": "internal remark", "idMusicAlbum": album.to_string()}),
    )
    .await;

    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    match outcome.row.relations().get("note") {
        Some(RelatedEntities::Many(notes)) => {
            assert_eq!(notes.len(), 1);
            assert_eq!(
                notes[0].field("body"),
                Some(&json!("recorded in one afternoon"))
            );
        }
        other => panic!("expected the public note to load, got {other:?}"),
    }

    // An explicit `all` request still honors table-level read.
    let options = FetchOptions {
        relations: RelationOptions {
            request: RelationRequest::parse(Some("all")),
            ..RelationOptions::default()
        },
        ..FetchOptions::default()
    };
    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &options)
        .await);
    assert!(!outcome.row.relations().contains_key("note"));
}

#[tokio::test]
async fn named_relation_requests_validate_names_but_not_permissions() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    // A readable actor naming an unreadable relation gets it dropped quietly.
    let options = FetchOptions {
        relations: RelationOptions {
            request: RelationRequest::parse(Some("byArtist")),
            ..RelationOptions::default()
        },
        ..FetchOptions::default()
    };
    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &options)
        .await);
    assert!(outcome.row.relations().is_empty());

    let options = FetchOptions {
        relations: RelationOptions {
            request: RelationRequest::parse(Some("discography")),
            ..RelationOptions::default()
        },
        ..FetchOptions::default()
    };
    let unknown = harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &options)
        .await;
    assert!(matches!(unknown, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn nested_expansion_skips_the_origin_table() {
    let harness = harness();
    let recording = seed(
        &harness.store,
        "Recording",
        None,
        GrantState::Public,
        json!({"name": "Blue Train (take 8)"}),
    )
    .await;
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    seed(
        &harness.store,
        "MusicAlbumTrack",
        None,
        GrantState::Public,
        json!({
            "name": "Blue Train",
            "position": 1,
            "idMusicAlbum": album.to_string(),
            "idRecording": recording.to_string()
        }),
    )
    .await;

    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    let tracks = match outcome.row.relations().get("track") {
        Some(RelatedEntities::Many(tracks)) => tracks,
        other => panic!("expected track collection, got {other:?}"),
    };
    assert_eq!(tracks.len(), 1);
    assert!(tracks[0].relations().contains_key("idRecording"));
    assert!(!tracks[0].relations().contains_key("idMusicAlbum"));
}

#[tokio::test]
async fn compact_relations_reduce_to_display_fields() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    seed(
        &harness.store,
        "MusicAlbumTrack",
        Some("user-o"),
        GrantState::Public,
        json!({"name": "Blue Train", "position": 1, "idMusicAlbum": album.to_string()}),
    )
    .await;

    let options = FetchOptions {
        relations: RelationOptions {
            compact: true,
            ..RelationOptions::default()
        },
        ..FetchOptions::default()
    };
    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &options)
        .await);

    let tracks = match outcome.row.relations().get("track") {
        Some(RelatedEntities::Many(tracks)) => tracks,
        other => panic!("expected track collection, got {other:?}"),
    };
    let rendered = tracks[0].to_value();
    assert_eq!(rendered.get("name"), Some(&json!("Blue Train")));
    assert_eq!(rendered.get("_table"), Some(&json!("MusicAlbumTrack")));
    assert!(rendered.get("position").is_none());
    assert!(rendered.get("ownerId").is_none());
    assert!(rendered.get("_relations").is_none());
}

#[tokio::test]
async fn absent_and_zero_foreign_keys_never_fetch() {
    let harness = harness();
    let album = seed(
        &harness.store,
        "MusicAlbum",
        None,
        GrantState::Public,
        json!({"name": "Unattributed", "byArtist": "0"}),
    )
    .await;

    let outcome = ok(harness
        .guard
        .fetch_one(&editor(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    assert!(!outcome.row.relations().contains_key("byArtist"));
}

#[tokio::test]
async fn search_terms_filter_and_qualified_terms_join() {
    let harness = harness();
    let coltrane = seed(
        &harness.store,
        "Organization",
        None,
        GrantState::Public,
        json!({"name": "John Coltrane"}),
    )
    .await;
    let monk = seed(
        &harness.store,
        "Organization",
        None,
        GrantState::Public,
        json!({"name": "Thelonious Monk"}),
    )
    .await;
    seed(
        &harness.store,
        "MusicAlbum",
        None,
        GrantState::Public,
        json!({"name": "Blue Train", "releaseYear": 1957, "byArtist": coltrane.to_string()}),
    )
    .await;
    seed(
        &harness.store,
        "MusicAlbum",
        None,
        GrantState::Public,
        json!({"name": "Brilliant Corners", "releaseYear": 1957, "byArtist": monk.to_string()}),
    )
    .await;

    let options = FetchOptions {
        search: vec![SearchTerm {
            field: "Organization.name".to_owned(),
            operator: FilterOperator::Contains,
            value: json!("monk"),
        }],
        ..FetchOptions::default()
    };
    let outcome = ok(harness.guard.fetch_many(&member(), "MusicAlbum", &options).await);
    assert_eq!(outcome.pagination.total, 1);
    assert_eq!(outcome.rows[0].field("name"), Some(&json!("Brilliant Corners")));

    let options = FetchOptions {
        search: vec![SearchTerm {
            field: "nonexistent".to_owned(),
            operator: FilterOperator::Eq,
            value: json!("x"),
        }],
        ..FetchOptions::default()
    };
    let unknown = harness.guard.fetch_many(&member(), "MusicAlbum", &options).await;
    assert!(matches!(unknown, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn numeric_ordering_and_pagination() {
    let harness = harness();
    for (name, year) in [("a", 1960), ("b", 1955), ("c", 2001)] {
        seed(
            &harness.store,
            "MusicAlbum",
            None,
            GrantState::Public,
            json!({"name": name, "releaseYear": year}),
        )
        .await;
    }

    let options = FetchOptions {
        order_by: Some("releaseYear".to_owned()),
        order: SortDirection::Desc,
        limit: Some(2),
        ..FetchOptions::default()
    };
    let outcome = ok(harness.guard.fetch_many(&member(), "MusicAlbum", &options).await);
    assert_eq!(outcome.pagination.total, 3);
    assert_eq!(outcome.pagination.count, 2);
    let names: Vec<Option<&Value>> = outcome.rows.iter().map(|row| row.field("name")).collect();
    assert_eq!(names, vec![Some(&json!("c")), Some(&json!("a"))]);

    let options = FetchOptions {
        limit: Some(0),
        ..FetchOptions::default()
    };
    let invalid = harness.guard.fetch_many(&member(), "MusicAlbum", &options).await;
    assert!(matches!(invalid, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn numeric_comparisons_accept_digits_and_reject_text() {
    let harness = harness();
    for (name, year) in [("a", 1960), ("b", 1955)] {
        seed(
            &harness.store,
            "MusicAlbum",
            None,
            GrantState::Public,
            json!({"name": name, "releaseYear": year}),
        )
        .await;
    }

    // A numeric string is coerced before it reaches the store.
    let options = FetchOptions {
        search: vec![SearchTerm {
            field: "releaseYear".to_owned(),
            operator: FilterOperator::Gt,
            value: json!("1957"),
        }],
        ..FetchOptions::default()
    };
    let outcome = ok(harness.guard.fetch_many(&member(), "MusicAlbum", &options).await);
    assert_eq!(outcome.pagination.total, 1);
    assert_eq!(outcome.rows[0].field("name"), Some(&json!("a")));

    let options = FetchOptions {
        search: vec![SearchTerm {
            field: "releaseYear".to_owned(),
            operator: FilterOperator::Gt,
            value: json!("vintage"),
        }],
        ..FetchOptions::default()
    };
    let malformed = harness.guard.fetch_many(&member(), "MusicAlbum", &options).await;
    assert!(matches!(malformed, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn field_selection_narrows_returned_data() {
    let harness = harness();
    let id = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    let options = FetchOptions {
        field_selection: Some(vec!["name".to_owned()]),
        ..FetchOptions::default()
    };
    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", id, &options)
        .await);
    assert!(outcome.row.field("name").is_some());
    assert!(outcome.row.field("releaseYear").is_none());
}

#[tokio::test]
async fn describe_reflects_the_actor_permissions() {
    let harness = harness();

    let description = ok(harness.guard.describe(&member(), "MusicAlbum"));
    assert!(description.fields.contains_key("name"));
    assert!(!description.fields.contains_key("secretNote"));
    assert_eq!(
        description.collections.get("track"),
        Some(&"MusicAlbumTrack".to_owned())
    );
    assert_eq!(description.display_fields, vec!["name".to_owned()]);

    let description = ok(harness.guard.describe(&editor(), "MusicAlbum"));
    assert!(description.fields.contains_key("secretNote"));
}

#[tokio::test]
async fn create_forces_draft_ownership_and_strips_unwritable_fields() {
    let harness = harness();

    let payload = object(json!({
        "name": "Giant Steps",
        "id": "11111111-1111-1111-1111-111111111111",
        "granted": "shared",
        "popularity": 99,
        "_relations": {},
        "unheardOf": true
    }));
    let created = ok(harness.guard.create(&member(), "MusicAlbum", payload).await);
    assert_eq!(created.owner_subject(), Some("user-m"));
    assert_eq!(created.grant_state(), &GrantState::Draft);
    assert!(created.field("popularity").is_none());
    assert!(created.field("unheardOf").is_none());
    assert_ne!(
        created.id().to_string(),
        "11111111-1111-1111-1111-111111111111"
    );

    let payload = object(json!({"name": "x", "secretNote": "classified"}));
    let denied = harness.guard.create(&member(), "MusicAlbum", payload).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let payload = object(json!({"name": "x", "secretNote": "classified"}));
    let allowed = harness.guard.create(&editor(), "MusicAlbum", payload).await;
    assert!(allowed.is_ok());

    let payload = object(json!({"name": "x"}));
    let anonymous = harness.guard.create(&Actor::anonymous(), "MusicAlbum", payload).await;
    assert!(matches!(anonymous, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn update_gates_visibility_changes_behind_the_publish_grant() {
    let harness = harness();
    let id = seed_album(&harness, "Blue Train", GrantState::Draft, Some("user-m")).await;

    let shared = ok(harness
        .guard
        .update(&member(), "MusicAlbum", id, object(json!({"granted": "shared"})))
        .await);
    assert_eq!(shared.grant_state(), &GrantState::Shared);

    let publish = harness
        .guard
        .update(
            &member(),
            "MusicAlbum",
            id,
            object(json!({"granted": "published @member"})),
        )
        .await;
    assert!(matches!(publish, Err(AppError::Forbidden(_))));

    let published = ok(harness
        .guard
        .update(
            &editor(),
            "MusicAlbum",
            id,
            object(json!({"granted": "published @member"})),
        )
        .await);
    assert_eq!(
        published.grant_state(),
        &GrantState::Published("member".to_owned())
    );

    let cleared = ok(harness
        .guard
        .update(&member(), "MusicAlbum", id, object(json!({"granted": null})))
        .await);
    assert_eq!(cleared.grant_state(), &GrantState::Public);

    let garbage = harness
        .guard
        .update(&member(), "MusicAlbum", id, object(json!({"granted": "promoted"})))
        .await;
    assert!(matches!(garbage, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn update_and_delete_respect_row_visibility() {
    let harness = harness();
    let foreign = seed_album(&harness, "hidden", GrantState::Draft, Some("user-o")).await;

    let update = harness
        .guard
        .update(&member(), "MusicAlbum", foreign, object(json!({"name": "mine now"})))
        .await;
    assert!(matches!(update, Err(AppError::Forbidden(_))));

    let delete = harness.guard.delete(&member(), "MusicAlbum", foreign).await;
    assert!(matches!(delete, Err(AppError::Forbidden(_))));

    let own = seed_album(&harness, "mine", GrantState::Draft, Some("user-m")).await;
    assert!(harness.guard.delete(&member(), "MusicAlbum", own).await.is_ok());
    let gone = harness
        .guard
        .fetch_one(&member(), "MusicAlbum", own, &FetchOptions::default())
        .await;
    assert!(matches!(gone, Err(AppError::NotFound(_))));
}

async fn seed_track(harness: &Harness, album: Uuid, name: &str, position: i64) -> Uuid {
    seed(
        &harness.store,
        "MusicAlbumTrack",
        None,
        GrantState::Public,
        json!({"name": name, "position": position, "idMusicAlbum": album.to_string()}),
    )
    .await
}

#[tokio::test]
async fn updates_never_touch_ordering_columns() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    let track = seed_track(&harness, album, "Blue Train", 1).await;

    let updated = ok(harness
        .guard
        .update(
            &member(),
            "MusicAlbumTrack",
            track,
            object(json!({"name": "Lazy Bird", "position": 9})),
        )
        .await);
    assert_eq!(updated.field("name"), Some(&json!("Lazy Bird")));
    assert_eq!(updated.field("position"), Some(&json!(1)));
}

#[tokio::test]
async fn reorder_rewrites_positions_from_array_order() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    let first = seed_track(&harness, album, "Blue Train", 0).await;
    let second = seed_track(&harness, album, "Moment's Notice", 1).await;
    let third = seed_track(&harness, album, "Locomotion", 2).await;

    let reordered = harness
        .reorder
        .reorder(
            &member(),
            "MusicAlbumTrack",
            "idMusicAlbum",
            album,
            &[third, first, second],
        )
        .await;
    assert!(reordered.is_ok());

    let outcome = ok(harness
        .guard
        .fetch_one(&member(), "MusicAlbum", album, &FetchOptions::default())
        .await);
    match outcome.row.relations().get("track") {
        Some(RelatedEntities::Many(tracks)) => {
            let names: Vec<Option<&Value>> =
                tracks.iter().map(|track| track.field("name")).collect();
            assert_eq!(
                names,
                vec![
                    Some(&json!("Locomotion")),
                    Some(&json!("Blue Train")),
                    Some(&json!("Moment's Notice"))
                ]
            );
        }
        other => panic!("expected track collection, got {other:?}"),
    }
}

#[tokio::test]
async fn reorder_rejects_any_sibling_set_mismatch() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    let first = seed_track(&harness, album, "Blue Train", 0).await;
    let second = seed_track(&harness, album, "Moment's Notice", 1).await;

    let subset = harness
        .reorder
        .reorder(&member(), "MusicAlbumTrack", "idMusicAlbum", album, &[first])
        .await;
    assert!(matches!(subset, Err(AppError::Validation(_))));

    let superset = harness
        .reorder
        .reorder(
            &member(),
            "MusicAlbumTrack",
            "idMusicAlbum",
            album,
            &[first, second, Uuid::new_v4()],
        )
        .await;
    assert!(matches!(superset, Err(AppError::Validation(_))));

    let duplicated = harness
        .reorder
        .reorder(
            &member(),
            "MusicAlbumTrack",
            "idMusicAlbum",
            album,
            &[first, first],
        )
        .await;
    assert!(matches!(duplicated, Err(AppError::Validation(_))));

    // Nothing was written by the failed attempts.
    let row = ok(harness.store.find_row("MusicAlbumTrack", second).await);
    assert!(row.is_some_and(|row| row.field("position") == Some(&json!(1))));
}

#[tokio::test]
async fn reorder_counts_siblings_the_actor_cannot_see() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;
    let visible = seed_track(&harness, album, "Blue Train", 0).await;
    let hidden = seed(
        &harness.store,
        "MusicAlbumTrack",
        Some("user-o"),
        GrantState::Draft,
        json!({"name": "unreleased take", "position": 1, "idMusicAlbum": album.to_string()}),
    )
    .await;

    let partial = harness
        .reorder
        .reorder(&member(), "MusicAlbumTrack", "idMusicAlbum", album, &[visible])
        .await;
    assert!(matches!(partial, Err(AppError::Validation(_))));

    let complete = harness
        .reorder
        .reorder(
            &member(),
            "MusicAlbumTrack",
            "idMusicAlbum",
            album,
            &[hidden, visible],
        )
        .await;
    assert!(complete.is_ok());
}

#[tokio::test]
async fn reorder_requires_an_orderable_relation_and_update_grant() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    let not_orderable = harness
        .reorder
        .reorder(&member(), "MusicAlbumTrack", "idRecording", album, &[])
        .await;
    assert!(matches!(not_orderable, Err(AppError::Validation(_))));

    let anonymous = harness
        .reorder
        .reorder(
            &Actor::anonymous(),
            "MusicAlbumTrack",
            "idMusicAlbum",
            album,
            &[],
        )
        .await;
    assert!(matches!(anonymous, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn duplication_clones_the_parent_and_visible_children() {
    let harness = harness();
    let album = seed(
        &harness.store,
        "MusicAlbum",
        Some("user-o"),
        GrantState::Public,
        json!({"name": "Blue Train", "releaseYear": 1957, "popularity": 88}),
    )
    .await;
    seed_track(&harness, album, "Blue Train", 0).await;
    seed_track(&harness, album, "Moment's Notice", 1).await;
    seed(
        &harness.store,
        "MusicAlbumTrack",
        Some("user-o"),
        GrantState::Draft,
        json!({"name": "unreleased take", "position": 2, "idMusicAlbum": album.to_string()}),
    )
    .await;

    let outcome = ok(harness
        .duplication
        .duplicate(&member(), "MusicAlbum", album, &["track".to_owned()])
        .await);

    let copy = ok(harness.store.find_row("MusicAlbum", outcome.new_id).await);
    let copy = match copy {
        Some(copy) => copy,
        None => panic!("parent copy should exist"),
    };
    assert_ne!(copy.id(), album);
    assert_eq!(copy.owner_subject(), Some("user-m"));
    assert_eq!(copy.grant_state(), &GrantState::Draft);
    assert_eq!(copy.field("name"), Some(&json!("Blue Train")));
    // Computed fields have no physical column and never travel into copies.
    assert!(copy.field("popularity").is_none());

    assert_eq!(outcome.relations.len(), 1);
    assert_eq!(outcome.relations[0].relation, "track");
    assert_eq!(outcome.relations[0].cloned, 2);
    assert_eq!(outcome.relations[0].failed, 0);

    let children = ok(harness
        .store
        .query_rows(
            "MusicAlbumTrack",
            &RowQuery {
                filters: vec![rowgate_application::RowFilter::eq(
                    "idMusicAlbum".to_owned(),
                    Value::String(outcome.new_id.to_string()),
                )],
                ..RowQuery::default()
            },
        )
        .await);
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|child| {
        child.owner_subject() == Some("user-m") && child.grant_state() == &GrantState::Draft
    }));
}

#[tokio::test]
async fn duplication_validates_relations_before_writing() {
    let harness = harness();
    let album = seed_album(&harness, "Blue Train", GrantState::Public, None).await;

    let unknown = harness
        .duplication
        .duplicate(&member(), "MusicAlbum", album, &["discography".to_owned()])
        .await;
    assert!(matches!(unknown, Err(AppError::Validation(_))));

    let total = ok(harness.store.count_rows("MusicAlbum", &RowQuery::default()).await);
    assert_eq!(total, 1);
}

#[tokio::test]
async fn duplication_requires_a_visible_source() {
    let harness = harness();
    let hidden = seed_album(&harness, "hidden", GrantState::Draft, Some("user-o")).await;

    let forbidden = harness
        .duplication
        .duplicate(&member(), "MusicAlbum", hidden, &[])
        .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden(_))));

    let missing = harness
        .duplication
        .duplicate(&member(), "MusicAlbum", Uuid::new_v4(), &[])
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let visible_to_owner = harness
        .duplication
        .duplicate(&other_member(), "MusicAlbum", hidden, &[])
        .await;
    assert!(visible_to_owner.is_ok());
}
