use mongodb::bson::{doc, Bson, Timestamp};
use mysql_async::Value;
use oplog_relay::defs::{ColumnType, Definition, FieldMapping};
use oplog_relay::mongo::{Action, LogEntry};
use oplog_relay::mysql::statement;

fn field(name: &str, ty: ColumnType, primary: bool) -> FieldMapping {
    FieldMapping {
        field: name.to_string(),
        column: name.to_string(),
        ty,
        primary,
    }
}

fn users_def() -> Definition {
    Definition::new(
        "users".to_string(),
        "app.users".to_string(),
        "users".to_string(),
        vec![
            field("_id", ColumnType::String, true),
            field("name", ColumnType::String, false),
            field("age", ColumnType::Number, false),
        ],
    )
    .unwrap()
}

fn entry(raw: mongodb::bson::Document) -> LogEntry {
    LogEntry::parse(&raw).unwrap()
}

fn ts(time: u32, increment: u32) -> Timestamp {
    Timestamp { time, increment }
}

/// Runs an entry through the same dispatch the tailer uses and renders the
/// statement it would execute, if any.
fn translate(def: &Definition, entry: &LogEntry) -> Option<statement::Statement> {
    match entry.action(&def.id_field().field).unwrap() {
        Action::Insert { doc, replace } => Some(statement::insert(def, doc, replace)),
        Action::Update { id, set, unset } => statement::update(def, id, set, unset),
        Action::Delete { id } => Some(statement::delete(def, id)),
        Action::Skip => None,
    }
}

#[test]
fn insert_binds_every_mapped_field() {
    // Scenario 1: plain insert of a fully populated document.
    let def = users_def();
    let doc = doc! { "_id": "u1", "name": "Ann", "age": 30 };
    let stmt = statement::insert(&def, &doc, false);

    assert_eq!(
        stmt.sql,
        "INSERT INTO `users` (`_id`, `name`, `age`) VALUES (?, ?, ?)"
    );
    assert_eq!(
        stmt.params,
        vec![
            Value::from("u1".to_string()),
            Value::from("Ann".to_string()),
            Value::Double(30.0),
        ]
    );
}

#[test]
fn insert_renders_absent_fields_as_null() {
    let def = users_def();
    let doc = doc! { "_id": "u2", "name": "Bo" };
    let stmt = statement::insert(&def, &doc, false);
    assert_eq!(stmt.params[2], Value::NULL);
}

#[test]
fn replace_uses_replace_verb() {
    let def = users_def();
    let doc = doc! { "_id": "u1", "name": "Ann", "age": 30 };
    let stmt = statement::insert(&def, &doc, true);
    assert!(stmt.sql.starts_with("REPLACE INTO `users`"));
}

#[test]
fn update_touches_only_named_columns() {
    // Scenario 2: $set on a single field.
    let def = users_def();
    let set = doc! { "age": 31 };
    let stmt = statement::update(&def, &Bson::String("u1".to_string()), Some(&set), None)
        .expect("one column is touched");

    assert_eq!(stmt.sql, "UPDATE `users` SET `age` = ? WHERE `_id` = ?");
    assert_eq!(
        stmt.params,
        vec![Value::Double(31.0), Value::from("u1".to_string())]
    );
}

#[test]
fn unset_columns_render_as_null() {
    let def = users_def();
    let unset = doc! { "name": "" };
    let stmt = statement::update(&def, &Bson::String("u1".to_string()), None, Some(&unset))
        .expect("one column is touched");

    assert_eq!(stmt.sql, "UPDATE `users` SET `name` = ? WHERE `_id` = ?");
    assert_eq!(stmt.params[0], Value::NULL);
}

#[test]
fn empty_update_issues_no_statement() {
    let def = users_def();
    assert_eq!(
        statement::update(&def, &Bson::String("u1".to_string()), None, None),
        None
    );

    // Payloads naming only unmapped fields count as empty too.
    let set = doc! { "nickname": "annie" };
    assert_eq!(
        statement::update(&def, &Bson::String("u1".to_string()), Some(&set), None),
        None
    );
}

#[test]
fn delete_targets_the_primary_key() {
    // Scenario 3.
    let def = users_def();
    let stmt = statement::delete(&def, &Bson::String("u1".to_string()));
    assert_eq!(stmt.sql, "DELETE FROM `users` WHERE `_id` = ?");
    assert_eq!(stmt.params, vec![Value::from("u1".to_string())]);
}

#[test]
fn replayed_update_and_delete_render_identically() {
    // At-least-once delivery: the second application of an update or delete
    // must produce the same statement, hence the same row state.
    let def = users_def();
    let update_entry = entry(doc! {
        "ts": ts(10, 1),
        "op": "u",
        "ns": "app.users",
        "o": { "$set": { "age": 31 } },
        "o2": { "_id": "u1" },
    });
    assert_eq!(translate(&def, &update_entry), translate(&def, &update_entry));

    let delete_entry = entry(doc! {
        "ts": ts(10, 2),
        "op": "d",
        "ns": "app.users",
        "o": { "_id": "u1" },
    });
    assert_eq!(translate(&def, &delete_entry), translate(&def, &delete_entry));
}

#[test]
fn same_key_operations_stay_in_source_order() {
    // Insert, update, replace, delete against one key. The translation must
    // preserve source log order; any reordering would be visible in the
    // statement sequence.
    let def = users_def();
    let entries = vec![
        entry(doc! {
            "ts": ts(20, 1), "op": "i", "ns": "app.users",
            "o": { "_id": "u1", "name": "Ann", "age": 30 },
        }),
        entry(doc! {
            "ts": ts(20, 2), "op": "u", "ns": "app.users",
            "o": { "$set": { "age": 31 } }, "o2": { "_id": "u1" },
        }),
        entry(doc! {
            "ts": ts(20, 3), "op": "u", "ns": "app.users",
            "o": { "_id": "u1", "name": "Anne", "age": 32 },
        }),
        entry(doc! {
            "ts": ts(20, 4), "op": "d", "ns": "app.users",
            "o": { "_id": "u1" },
        }),
    ];

    let statements: Vec<String> = entries
        .iter()
        .filter_map(|e| translate(&def, e))
        .map(|s| s.sql)
        .collect();

    assert_eq!(
        statements,
        vec![
            "INSERT INTO `users` (`_id`, `name`, `age`) VALUES (?, ?, ?)".to_string(),
            "UPDATE `users` SET `age` = ? WHERE `_id` = ?".to_string(),
            "REPLACE INTO `users` (`_id`, `name`, `age`) VALUES (?, ?, ?)".to_string(),
            "DELETE FROM `users` WHERE `_id` = ?".to_string(),
        ]
    );

    // Timestamps along the sequence are strictly increasing, so checkpoint
    // advancement after each entry never moves backward.
    let positions: Vec<u64> = entries.iter().map(|e| e.ts).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn create_table_ddl_recreates_each_table() {
    let def = users_def();
    let ddl = statement::create_table(&def);
    assert_eq!(
        ddl,
        vec![
            "DROP TABLE IF EXISTS `users`".to_string(),
            "CREATE TABLE `users` (`_id` VARCHAR(255) PRIMARY KEY, `name` VARCHAR(255), `age` DOUBLE)"
                .to_string(),
        ]
    );
}

#[test]
fn checkpoint_table_ddl_and_seed() {
    let ddl = statement::create_checkpoint_table();
    assert_eq!(ddl[0], "DROP TABLE IF EXISTS `replication_checkpoint`");
    assert_eq!(
        ddl[1],
        "CREATE TABLE `replication_checkpoint` (service varchar(20), timestamp BIGINT)"
    );

    let seed = statement::seed_checkpoint("app");
    assert_eq!(
        seed.sql,
        "INSERT INTO `replication_checkpoint` (service, timestamp) VALUES (?, 0)"
    );
    assert_eq!(seed.params, vec![Value::from("app")]);
}

#[test]
fn untrusted_content_stays_out_of_statement_text() {
    let def = users_def();
    let doc = doc! { "_id": "u1'; DROP TABLE users; --", "name": "x", "age": 1 };
    let stmt = statement::insert(&def, &doc, false);
    assert!(!stmt.sql.contains("DROP TABLE users"));
    assert_eq!(stmt.params[0], Value::from("u1'; DROP TABLE users; --"));
}
