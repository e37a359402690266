use crate::{Args, Context, Result, RowLabeled};
use std::{fmt::Display, future::Future};
use uuid::Uuid;

/// Identifier of an entity.
pub trait Identifier: Clone + Display + Send + Sync + 'static {
    /// Whether the identifier is unset: the database (or the `prepare` hook) is expected to
    /// assign it.
    fn is_zero(&self) -> bool;
    /// Build the identifier from the auto increment value reported by the driver.
    fn from_last_insert_id(_id: i64) -> Option<Self> {
        None
    }
}

macro_rules! impl_identifier {
    ($($ty:ty),+) => {
        $(impl Identifier for $ty {
            fn is_zero(&self) -> bool {
                *self == 0
            }
            fn from_last_insert_id(id: i64) -> Option<Self> {
                <$ty>::try_from(id).ok()
            }
        })+
    };
}
impl_identifier!(i32, i64, u32, u64);

impl Identifier for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl Identifier for Uuid {
    fn is_zero(&self) -> bool {
        self.is_nil()
    }
}

/// Declarative description of how an entity lives in a table.
///
/// Keep these consistent: `columns` lists exactly the keys of `to_args`, the keys of
/// `query_id` are a subset of them, and `id` agrees with `query_id`.
pub trait Mapping: Send + Sync + 'static {
    type Entity: Send + Sync;
    type Id: Identifier;

    fn table_name(&self) -> &str;

    /// Columns selected and scanned back.
    fn columns(&self) -> &[&str];

    fn scan(&self, row: &RowLabeled) -> Result<Self::Entity>;

    /// Column values of the entity. A column whose value should be assigned by the database
    /// (e.g. an auto increment key still at zero) is left out.
    fn to_args(&self, entity: &Self::Entity) -> Result<Args>;

    /// Predicate selecting the row of `id`.
    fn query_id(&self, id: &Self::Id) -> Args;

    /// Hook called before an entity gets inserted, for example to assign a generated id.
    fn prepare(
        &self,
        _ctx: &Context,
        _entity: &mut Self::Entity,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    fn id(&self, entity: &Self::Entity) -> Option<Self::Id>;

    fn set_id(&self, _entity: &mut Self::Entity, _id: Self::Id) -> bool {
        false
    }
}
