//! JSON-file data-source engine
//!
//! Backs a record set with a single JSON file under the descriptor
//! directory. Fetch returns the whole file — no filtering, sorting or
//! paging. Mutations scan linearly for a row whose primary-key projection
//! equals the request's and rewrite the whole file. A missing file is an
//! empty record set.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use gridway_protocol::DsResponse;

use crate::context::DsContext;
use crate::datasource::{records_to_json, DataSource};
use crate::descriptor::DataSourceDescriptor;
use crate::error::{Error, Result};
use crate::request::DsRequest;

/// File-backed engine for `serverType: "json"` descriptors.
pub struct JsonFileDataSource {
    descriptor: Arc<DataSourceDescriptor>,
    ctx: Arc<DsContext>,
    request: Option<DsRequest>,
}

impl JsonFileDataSource {
    /// Create an engine over a descriptor.
    pub fn new(descriptor: Arc<DataSourceDescriptor>, ctx: Arc<DsContext>) -> Self {
        Self {
            descriptor,
            ctx,
            request: None,
        }
    }

    fn file_path(&self) -> PathBuf {
        let file_name = self
            .descriptor
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}.data.json", self.descriptor.id));
        self.ctx.path.join(file_name)
    }

    async fn read_rows(&self) -> Result<Vec<Map<String, Value>>> {
        let path = self.file_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(data_source = %self.descriptor.id, path = %path.display(),
                       "data file missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let doc: Value = serde_json::from_str(&content).map_err(|e| Error::DescriptorParse {
            id: self.descriptor.id.clone(),
            message: format!("data file {}: {e}", path.display()),
        })?;
        Ok(self.descriptor.to_records(&doc))
    }

    async fn write_rows(&self, rows: &[Map<String, Value>]) -> Result<()> {
        let doc = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        let content = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::invalid_request(e.to_string()))?;
        tokio::fs::write(self.file_path(), content).await?;
        Ok(())
    }

    fn bound_request(&self) -> Result<&DsRequest> {
        self.request
            .as_ref()
            .ok_or_else(|| Error::invalid_request("no request bound; init was not run"))
    }

    /// Index of the row whose PK projection equals `pk`.
    fn position_by_pk(
        &self,
        rows: &[Map<String, Value>],
        pk: &Map<String, Value>,
    ) -> Option<usize> {
        rows.iter()
            .position(|row| self.descriptor.pk_value(row).map_or(false, |row_pk| row_pk == *pk))
    }
}

#[async_trait]
impl DataSource for JsonFileDataSource {
    fn descriptor(&self) -> &Arc<DataSourceDescriptor> {
        &self.descriptor
    }

    fn request(&self) -> Option<&DsRequest> {
        self.request.as_ref()
    }

    async fn init(&mut self, request: DsRequest) -> Result<()> {
        self.request = Some(request);
        Ok(())
    }

    async fn execute_fetch(&mut self) -> Result<DsResponse> {
        let rows = self.read_rows().await?;
        let total = rows.len() as u64;
        Ok(DsResponse::fetch(records_to_json(rows), 0, total, total))
    }

    async fn execute_add(&mut self) -> Result<DsResponse> {
        let values = self
            .bound_request()?
            .values_object()
            .cloned()
            .ok_or_else(|| Error::invalid_request("add requires record values"))?;
        let record = self.descriptor.to_record(&values);
        self.descriptor.pk_value(&record)?;

        let mut rows = self.read_rows().await?;
        rows.push(record.clone());
        self.write_rows(&rows).await?;

        let mut response = DsResponse::success(Value::Array(vec![Value::Object(record)]));
        response.affected_rows = Some(1);
        Ok(response)
    }

    async fn execute_update(&mut self) -> Result<DsResponse> {
        let request = self.bound_request()?;
        let criteria = request
            .criteria_object()
            .ok_or_else(|| Error::invalid_request("update requires primary-key criteria"))?;
        let pk = self.descriptor.pk_value(criteria)?;
        let values = request
            .values_object()
            .cloned()
            .ok_or_else(|| Error::invalid_request("update requires record values"))?;

        let mut rows = self.read_rows().await?;
        let index = self.position_by_pk(&rows, &pk).ok_or(Error::RowNotFound)?;

        let updates = self.descriptor.non_pk_value(&values);
        for (key, value) in updates {
            rows[index].insert(key, value);
        }
        let updated = rows[index].clone();
        self.write_rows(&rows).await?;

        let mut response = DsResponse::success(Value::Array(vec![Value::Object(updated)]));
        response.affected_rows = Some(1);
        Ok(response)
    }

    async fn execute_remove(&mut self) -> Result<DsResponse> {
        let criteria = self
            .bound_request()?
            .criteria_object()
            .ok_or_else(|| Error::invalid_request("remove requires primary-key criteria"))?;
        let pk = self.descriptor.pk_value(criteria)?;

        let mut rows = self.read_rows().await?;
        let index = self.position_by_pk(&rows, &pk).ok_or(Error::RowNotFound)?;
        rows.remove(index);
        self.write_rows(&rows).await?;

        let mut response = DsResponse::success(Value::Object(pk));
        response.affected_rows = Some(1);
        Ok(response)
    }

    async fn free_resources(&mut self) {
        self.request = None;
    }
}
