//! The five canonical operations, driven against a resource's bound store.

use crate::descriptor::Operation;
use crate::error::AppError;
use crate::params::{DeleteParameters, EditParameters, GetParameters, ListParameters, NewParameters, RequestContext};
use crate::query::{attach_foreign, compile_list, delete_selection, lookup};
use crate::registry::{Registry, Resource};
use crate::service::modifier;
use crate::service::projection::{clear_internal, read_properties, write_properties};
use crate::service::RequestValidator;
use crate::store::{Document, WriteResult};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;

/// One page of a list request. `limit` is `None` when the page is unbounded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListPage {
    pub results: Vec<Value>,
    pub total: u64,
    pub offset: u64,
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OperationOutput {
    One(Document),
    Page(ListPage),
    Keys(Vec<Value>),
    Ack(WriteResult),
    Empty,
}

fn into_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

pub struct CrudService;

impl CrudService {
    pub async fn dispatch(
        registry: &Registry,
        resource: &Resource,
        operation: Operation,
        ctx: &RequestContext,
    ) -> Result<OperationOutput, AppError> {
        Ok(match operation {
            Operation::Get => OperationOutput::One(Self::get(registry, resource, ctx).await?),
            Operation::List => OperationOutput::Page(Self::list(registry, resource, ctx).await?),
            Operation::New => OperationOutput::Keys(Self::create(registry, resource, ctx).await?),
            Operation::Edit => {
                Self::edit(registry, resource, ctx).await?;
                OperationOutput::Empty
            }
            Operation::Delete => OperationOutput::Ack(Self::delete(resource, ctx).await?),
        })
    }

    /// Fetch one row by id (or by the first match of `index`), projected onto the readable fields.
    pub async fn get(registry: &Registry, resource: &Resource, ctx: &RequestContext) -> Result<Document, AppError> {
        let descriptor = resource.descriptor();
        let params = GetParameters::extract(ctx, descriptor)?;
        let model = resource.model()?;

        let mut query = lookup(model.table.clone(), &params.id, params.index.as_deref());
        if !params.no_foreign {
            query = attach_foreign(query, descriptor, None);
        }
        tracing::debug!(resource = %descriptor.name(), plan = ?query, "compiled get");

        let mut row = match model.store.fetch_row(&query).await? {
            Some(Value::Object(row)) => row,
            _ => return Err(AppError::NotFound("Not Found".into())),
        };
        modifier::unlock(registry, resource, &mut row).await?;
        let mut out = read_properties(descriptor, &row, None).await?;
        clear_internal(descriptor, &mut out);
        Ok(out)
    }

    /// Filtered, sorted page plus the total count of the filtered set, fetched concurrently.
    pub async fn list(registry: &Registry, resource: &Resource, ctx: &RequestContext) -> Result<ListPage, AppError> {
        let descriptor = resource.descriptor();
        let params = ListParameters::extract(ctx, descriptor)?;
        let model = resource.model()?;
        let compiled = compile_list(ctx, descriptor, model.table.clone(), &params)?;

        let (rows, total) = tokio::try_join!(
            model.store.fetch_stream(&compiled.page),
            model.store.count(&compiled.total)
        )?;

        let mode = compiled.mode.as_deref();
        let results = try_join_all(rows.into_iter().map(|row| async move {
            let mut row = into_document(row);
            modifier::unlock(registry, resource, &mut row).await?;
            let mut out = read_properties(descriptor, &row, mode).await?;
            clear_internal(descriptor, &mut out);
            Ok::<_, AppError>(Value::Object(out))
        }))
        .await?;

        Ok(ListPage {
            results,
            total,
            offset: compiled.offset,
            limit: compiled.limit,
        })
    }

    /// Validate and insert the request body. Returns the generated primary keys.
    pub async fn create(registry: &Registry, resource: &Resource, ctx: &RequestContext) -> Result<Vec<Value>, AppError> {
        let descriptor = resource.descriptor();
        let params = NewParameters::extract(ctx, descriptor)?;
        let input = ctx.json_body()?;
        if !params.no_mandatory {
            RequestValidator::mandatory_fields(descriptor, &input, Operation::New)?;
        }
        RequestValidator::validate_types(descriptor, &input).await?;

        let mut record = write_properties(descriptor, &input, None)?;
        modifier::lock(registry, resource, &mut record).await?;

        let model = resource.model()?;
        let result = model.store.insert(&model.table, vec![record]).await?;
        if let Some(first_error) = result.first_error {
            return Err(AppError::Validation(first_error));
        }
        tracing::debug!(resource = %descriptor.name(), keys = ?result.generated_keys, "inserted");
        Ok(result.generated_keys)
    }

    /// Validate the body and merge it into the existing row.
    pub async fn edit(registry: &Registry, resource: &Resource, ctx: &RequestContext) -> Result<(), AppError> {
        let descriptor = resource.descriptor();
        let params = EditParameters::extract(ctx, descriptor)?;
        let input = ctx.json_body()?;
        if !params.no_mandatory {
            RequestValidator::mandatory_fields(descriptor, &input, Operation::Edit)?;
        }
        RequestValidator::validate_types(descriptor, &input).await?;

        let model = resource.model()?;
        let query = lookup(model.table.clone(), &params.id, params.index.as_deref());
        let mut previous = match model.store.fetch_row(&query).await? {
            Some(Value::Object(row)) => row,
            _ => return Err(AppError::NotFound("Not Found".into())),
        };
        modifier::unlock(registry, resource, &mut previous).await?;
        // the row may have been found through a secondary index
        let key = previous
            .get(&model.schema.primary_key)
            .cloned()
            .unwrap_or_else(|| Value::String(params.id.clone()));

        let mut record = write_properties(descriptor, &input, Some(previous))?;
        modifier::lock(registry, resource, &mut record).await?;
        let ack = model.store.update(&model.table, &key, record).await?;
        tracing::debug!(resource = %descriptor.name(), ack = ?ack, "updated");
        Ok(())
    }

    /// Delete one row or a batch of rows by primary key.
    pub async fn delete(resource: &Resource, ctx: &RequestContext) -> Result<WriteResult, AppError> {
        let descriptor = resource.descriptor();
        let params = DeleteParameters::extract(ctx, descriptor)?;
        let model = resource.model()?;
        let selection = delete_selection(model.table.clone(), &params.id);
        Ok(model.store.delete(&selection).await?)
    }
}
