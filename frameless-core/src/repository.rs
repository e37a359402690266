use crate::{
    Args, ConnectionAdapter, Context, Driver, DriverErrorKind, Error, ErrorExt, ErrorKind,
    Identifier, Mapping, Query, Result, Select, SqlWriter, short_type_name,
    stream::{Stream, StreamExt},
};
use async_stream::try_stream;
use std::{pin::pin, slice, sync::Arc};

/// Generic CRUD over a [`Mapping`], joining the transaction carried by the [`Context`].
///
/// Multi statement operations run in a nested transaction. The repository never retries.
pub struct Repository<M: Mapping, D: Driver> {
    mapping: Arc<M>,
    connection: ConnectionAdapter<D>,
}

impl<M: Mapping, D: Driver> Clone for Repository<M, D> {
    fn clone(&self) -> Self {
        Self {
            mapping: self.mapping.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<M: Mapping, D: Driver> Repository<M, D> {
    pub fn new(mapping: M, connection: ConnectionAdapter<D>) -> Self {
        Self {
            mapping: Arc::new(mapping),
            connection,
        }
    }

    pub fn mapping(&self) -> &M {
        &self.mapping
    }

    pub fn connection(&self) -> &ConnectionAdapter<D> {
        &self.connection
    }

    fn select(&self) -> Select<'_> {
        Select::new(self.mapping.table_name(), self.mapping.columns())
    }

    fn non_zero_id(&self, entity: &M::Entity) -> Option<M::Id> {
        self.mapping.id(entity).filter(|id| !id.is_zero())
    }

    fn on_write_error(&self, error: Error, id: Option<&M::Id>) -> Error {
        if self.connection.classify_error(&error) == Some(DriverErrorKind::UniqueViolation) {
            let id = id.map(ToString::to_string).unwrap_or_default();
            return error.context(ErrorKind::AlreadyExists).context(format!(
                "{} {} already exists",
                short_type_name::<M::Entity>(),
                id
            ));
        }
        error
    }

    /// Insert the entity and scan the stored row back into it, so values assigned by the
    /// database are observed.
    pub async fn create(&self, ctx: &Context, entity: &mut M::Entity) -> Result<()> {
        self.connection
            .with_tx(ctx, |ctx| async move {
                self.mapping.prepare(&ctx, entity).await?;
                let id = self.non_zero_id(entity);
                if let Some(id) = &id {
                    if self.find_by_id(&ctx, id).await?.is_some() {
                        return Err(Error::new(ErrorKind::AlreadyExists).context(format!(
                            "{} {} already exists",
                            short_type_name::<M::Entity>(),
                            id
                        )));
                    }
                }
                let args = self.mapping.to_args(entity)?;
                *entity = self.insert(&ctx, args, id).await?;
                Ok(())
            })
            .await
    }

    async fn insert(&self, ctx: &Context, args: Args, id: Option<M::Id>) -> Result<M::Entity> {
        let writer = self.connection.sql_writer();
        let mut query = Query::default();
        writer.write_insert(
            &mut query,
            self.mapping.table_name(),
            slice::from_ref(&args),
            self.mapping.columns(),
        );
        if writer.supports_returning() {
            let row = self
                .connection
                .query_row(ctx, query)
                .await
                .map_err(|e| self.on_write_error(e, id.as_ref()))?;
            return self.mapping.scan(&row);
        }
        let affected = self
            .connection
            .exec(ctx, query)
            .await
            .map_err(|e| self.on_write_error(e, id.as_ref()))?;
        let id = match id {
            Some(id) => id,
            None => affected
                .last_affected_id
                .and_then(M::Id::from_last_insert_id)
                .ok_or_else(|| {
                    Error::new(ErrorKind::MissingId).context(format!(
                        "Cannot read back the {} just inserted: the driver did not report its id",
                        short_type_name::<M::Entity>()
                    ))
                })?,
        };
        self.fetch_by_id(ctx, &id).await
    }

    /// `None` when there is no entity with this id.
    pub async fn find_by_id(&self, ctx: &Context, id: &M::Id) -> Result<Option<M::Entity>> {
        let filter = [self.mapping.query_id(id)];
        let mut query = Query::default();
        self.connection.sql_writer().write_select(
            &mut query,
            &Select {
                filter: Some(&filter),
                limit: Some(1),
                ..self.select()
            },
        );
        match self.connection.query_row(ctx, query).await {
            Ok(row) => self.mapping.scan(&row).map(Some),
            Err(e) if e.is_kind(ErrorKind::NoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_by_id(&self, ctx: &Context, id: &M::Id) -> Result<M::Entity> {
        self.find_by_id(ctx, id).await?.ok_or_else(|| {
            Error::new(ErrorKind::NotFound).context(format!(
                "{} {} not found",
                short_type_name::<M::Entity>(),
                id
            ))
        })
    }

    /// Stream every entity of the table. The stream stops after the first error.
    pub fn find_all(&self, ctx: &Context) -> impl Stream<Item = Result<M::Entity>> + Send + '_ {
        let ctx = ctx.clone();
        let mut query = Query::default();
        self.connection
            .sql_writer()
            .write_select(&mut query, &self.select());
        try_stream! {
            let mut rows = pin!(self.connection.query(&ctx, query));
            while let Some(row) = rows.next().await {
                yield self.mapping.scan(&row?)?;
            }
        }
    }

    /// Stream the entities with the given ids, failing with [`ErrorKind::NotFound`] before
    /// yielding anything unless every one of them exists. Repeated ids yield their entity once.
    pub fn find_by_ids(
        &self,
        ctx: &Context,
        ids: impl IntoIterator<Item = M::Id>,
    ) -> impl Stream<Item = Result<M::Entity>> + Send + '_ {
        let ctx = ctx.clone();
        let ids = ids.into_iter().collect::<Vec<_>>();
        try_stream! {
            if !ids.is_empty() {
                let mut filter = Vec::with_capacity(ids.len());
                for args in ids.iter().map(|id| self.mapping.query_id(id)) {
                    if !filter.contains(&args) {
                        filter.push(args);
                    }
                }
                let select = Select {
                    filter: Some(&filter),
                    ..self.select()
                };
                let writer = self.connection.sql_writer();
                let mut count = Query::default();
                writer.write_count(&mut count, &select);
                let found = self.connection.query_row(&ctx, count).await?.get_index::<i64>(0)?;
                if found != filter.len() as i64 {
                    Err::<(), Error>(Error::new(ErrorKind::NotFound).context(format!(
                        "Found {} out of {} {} ids",
                        found,
                        filter.len(),
                        short_type_name::<M::Entity>(),
                    )))?;
                }
                let mut query = Query::default();
                writer.write_select(&mut query, &select);
                let mut rows = pin!(self.connection.query(&ctx, query));
                while let Some(row) = rows.next().await {
                    yield self.mapping.scan(&row?)?;
                }
            }
        }
    }

    /// Update the row of the entity and read it back. [`ErrorKind::MissingId`] when the entity
    /// has no id, [`ErrorKind::NotFound`] when no row matches it.
    pub async fn update(&self, ctx: &Context, entity: &mut M::Entity) -> Result<()> {
        let Some(id) = self.non_zero_id(entity) else {
            return Err(Error::new(ErrorKind::MissingId).context(format!(
                "Cannot update {} without id",
                short_type_name::<M::Entity>()
            )));
        };
        self.connection
            .with_tx(ctx, |ctx| async move {
                let filter = self.mapping.query_id(&id);
                let mut set = self.mapping.to_args(entity)?;
                set.retain(|column| filter.get(column).is_none());
                if !set.is_empty() {
                    let mut query = Query::default();
                    self.connection.sql_writer().write_update(
                        &mut query,
                        self.mapping.table_name(),
                        &set,
                        &filter,
                    );
                    let affected = self
                        .connection
                        .exec(&ctx, query)
                        .await
                        .map_err(|e| self.on_write_error(e, Some(&id)))?;
                    if affected.rows_affected == 0 {
                        return Err(Error::new(ErrorKind::NotFound).context(format!(
                            "{} {} not found",
                            short_type_name::<M::Entity>(),
                            id
                        )));
                    }
                }
                *entity = self.fetch_by_id(&ctx, &id).await?;
                Ok(())
            })
            .await
    }

    /// Insert the entity or overwrite the row having the same id.
    pub async fn save(&self, ctx: &Context, entity: &mut M::Entity) -> Result<()> {
        self.connection
            .with_tx(ctx, |ctx| async move {
                if self.non_zero_id(entity).is_none() {
                    self.mapping.prepare(&ctx, entity).await?;
                }
                let args = self.mapping.to_args(entity)?;
                let Some(id) = self.non_zero_id(entity) else {
                    *entity = self.insert(&ctx, args, None).await?;
                    return Ok(());
                };
                let key = self.mapping.query_id(&id);
                let key = key.names().collect::<Vec<_>>();
                let writer = self.connection.sql_writer();
                let mut query = Query::default();
                writer.write_upsert(
                    &mut query,
                    self.mapping.table_name(),
                    &args,
                    &key,
                    self.mapping.columns(),
                );
                if writer.supports_returning() {
                    let row = self.connection.query_row(&ctx, query).await?;
                    *entity = self.mapping.scan(&row)?;
                } else {
                    self.connection.exec(&ctx, query).await?;
                    *entity = self.fetch_by_id(&ctx, &id).await?;
                }
                Ok(())
            })
            .await
    }

    /// [`ErrorKind::NotFound`] when there is no row with this id.
    pub async fn delete_by_id(&self, ctx: &Context, id: &M::Id) -> Result<()> {
        self.connection
            .with_tx(ctx, |ctx| async move {
                let filter = [self.mapping.query_id(id)];
                let mut query = Query::default();
                self.connection.sql_writer().write_delete(
                    &mut query,
                    self.mapping.table_name(),
                    Some(&filter),
                );
                let affected = self.connection.exec(&ctx, query).await?;
                if affected.rows_affected == 0 {
                    return Err(Error::new(ErrorKind::NotFound).context(format!(
                        "{} {} not found",
                        short_type_name::<M::Entity>(),
                        id
                    )));
                }
                Ok(())
            })
            .await
    }

    pub async fn delete_all(&self, ctx: &Context) -> Result<()> {
        self.connection
            .with_tx(ctx, |ctx| async move {
                let mut query = Query::default();
                self.connection
                    .sql_writer()
                    .write_delete(&mut query, self.mapping.table_name(), None);
                self.connection.exec(&ctx, query).await?;
                Ok(())
            })
            .await
    }

    /// Number of rows in the table.
    pub async fn count(&self, ctx: &Context) -> Result<u64> {
        let mut query = Query::default();
        self.connection
            .sql_writer()
            .write_count(&mut query, &self.select());
        let row = self.connection.query_row(ctx, query).await?;
        row.get_index::<u64>(0)
    }
}
