use crate::ValueWrap;
use frameless_core::{Result, Row, RowLabeled, RowNames};

pub(crate) struct RowWrap(pub(crate) RowLabeled);

impl RowWrap {
    /// `labels` is reused across the rows of the same result set.
    pub(crate) fn decode(mut row: mysql_async::Row, labels: &mut Option<RowNames>) -> Result<Self> {
        let columns = row.columns();
        let labels = labels
            .get_or_insert_with(|| columns.iter().map(|c| c.name_str().into_owned()).collect())
            .clone();
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let value = row
                    .take::<mysql_async::Value, _>(i)
                    .unwrap_or(mysql_async::Value::NULL);
                ValueWrap::decode(value, column).map(Into::into)
            })
            .collect::<Result<Row>>()?;
        Ok(Self(RowLabeled::new(labels, values)))
    }
}
