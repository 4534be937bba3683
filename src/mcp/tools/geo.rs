use std::sync::Arc;

use serde_json::Value;

use super::{ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
use crate::gateway::GeoProvider;
use crate::mcp::dispatcher::DispatchError;
use crate::mcp::schema::{ParamSpec, ToolArgs, ToolSchema};
use crate::mcp::session::SessionContext;
use crate::valuation::Coordinate;

/// Reverse geocoding: longitude/latitude strings to a formatted address.
pub struct QueryRegeoTool {
    geo: Arc<dyn GeoProvider>,
}

impl QueryRegeoTool {
    pub const NAME: &'static str = "query_regeo";

    pub fn new(geo: Arc<dyn GeoProvider>) -> Self {
        Self { geo }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::string("longitude", "Longitude in decimal degrees"),
            ParamSpec::string("latitude", "Latitude in decimal degrees"),
        ])
    }

    fn coordinate(args: &ToolArgs) -> Result<Coordinate, ToolError> {
        let parse = |field: &str| -> Result<f64, ToolError> {
            let raw = args.get_str(field).unwrap_or_default().trim();
            raw.parse::<f64>().map_err(|_| ToolError::InvalidInput {
                field: field.to_string(),
                reason: format!("'{raw}' is not a decimal number"),
            })
        };
        let (lng, lat) = (parse("longitude")?, parse("latitude")?);
        Coordinate::new(lng, lat).map_err(|err| ToolError::InvalidInput {
            field: "longitude".to_string(),
            reason: err.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ToolHandler for QueryRegeoTool {
    async fn call(&self, _ctx: &SessionContext, args: ToolArgs) -> Result<Value, ToolError> {
        let location = Self::coordinate(&args)?;
        let address = self.geo.reverse_geocode(location).await?;
        Ok(Value::String(address))
    }
}

pub fn register_geo_tools(
    registry: &mut ToolRegistry,
    geo: Arc<dyn GeoProvider>,
) -> Result<(), DispatchError> {
    registry.register(ToolDescriptor::new(
        QueryRegeoTool::NAME,
        "Resolve a longitude/latitude pair to a formatted street address",
        QueryRegeoTool::schema(),
        Arc::new(QueryRegeoTool::new(geo)),
    ))
}
