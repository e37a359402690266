#[cfg(test)]
mod tests {
    use frameless_core::{AsValue, Query, RowLabeled, RowNames, Value};
    use std::borrow::Cow;
    use time::macros::datetime;
    use uuid::Uuid;

    fn row() -> RowLabeled {
        let names: RowNames = ["id", "Name", "created", "payload", "missing"]
            .map(String::from)
            .into_iter()
            .collect();
        RowLabeled::new(
            names,
            [
                Value::Int64(Some(3)),
                Value::Varchar(Some("frameless".into())),
                Value::Varchar(Some("2025-01-02T03:04:05Z".into())),
                Value::Json(Some(serde_json::json!({"k": [1, 2]}))),
                Value::Null,
            ]
            .into(),
        )
    }

    #[test]
    fn value_from_native() {
        assert_eq!(Value::from(1i32), Value::Int32(Some(1)));
        assert_eq!(Value::from(true), Value::Boolean(Some(true)));
        assert_eq!(Value::from("x"), Value::Varchar(Some("x".into())));
        assert_eq!(Value::from(Cow::Borrowed("y")), Value::Varchar(Some("y".into())));
        assert_eq!(Value::from(None::<Uuid>), Value::Uuid(None));
        assert_eq!(7u32.as_value(), Value::Int64(Some(7)));
        assert!(Value::from(None::<String>).is_null());
        assert!(!Value::Varchar(Some(String::new())).is_null());
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int64(None).to_string(), "NULL");
        assert_eq!(Value::Varchar(Some("a".into())).to_string(), "'a'");
        assert_eq!(Value::Blob(Some([1u8, 2, 3].into())).to_string(), "<3 bytes>");
    }

    #[test]
    fn row_get() {
        let row = row();
        assert_eq!(row.get::<i64>("id").unwrap(), 3);
        assert_eq!(row.get::<u64>("ID").unwrap(), 3);
        assert_eq!(row.get::<String>("name").unwrap(), "frameless");
        assert_eq!(
            row.get::<time::OffsetDateTime>("created").unwrap(),
            datetime!(2025-01-02 03:04:05 UTC)
        );
        assert_eq!(
            row.get::<serde_json::Value>("payload").unwrap()["k"][1],
            2
        );
        assert_eq!(row.get::<Option<String>>("missing").unwrap(), None);
        assert!(row.get::<String>("missing").is_err());
        assert!(row.get::<i64>("unknown").is_err());
        assert_eq!(row.get_index::<String>(1).unwrap(), "frameless");
        assert!(row.get_index::<String>(5).is_err());
    }

    #[test]
    fn query_bind() {
        let query = Query::new("SELECT $1, $2;")
            .bind(1i64)
            .bind(Some("two".to_string()));
        assert_eq!(
            query.args,
            [Value::Int64(Some(1)), Value::Varchar(Some("two".into()))]
        );
        assert!(!query.is_empty());
        assert!(Query::from("  ").is_empty());
        assert_eq!(query.to_string(), "SELECT $1, $2;");
    }
}
