use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Spatial extent covered by a model result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub x_min: Option<f64>,
    #[serde(default)]
    pub x_max: Option<f64>,
    #[serde(default)]
    pub y_min: Option<f64>,
    #[serde(default)]
    pub y_max: Option<f64>,
    #[serde(default)]
    pub z_min: Option<f64>,
    #[serde(default)]
    pub z_max: Option<f64>,
}

/// One time bin of a seismicity forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSample {
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub b_value: Option<f64>,
    #[serde(default)]
    pub a_value: Option<f64>,
    #[serde(default)]
    pub mc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    #[serde(default)]
    samples: Vec<ForecastSample>,
    #[serde(default)]
    bounding_box: Option<BoundingBox>,
}

/// Result of a completed model run, as reported by the worker
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelResult {
    pub samples: Vec<ForecastSample>,
    pub bounding_box: Option<BoundingBox>,
    /// The worker's payload as received
    pub raw: Value,
}

impl ModelResult {
    /// Parse the `attributes.forecast` object of a completed task
    pub fn from_payload(payload: Value) -> Result<Self, serde_json::Error> {
        let parsed: ForecastPayload = serde_json::from_value(payload.clone())?;
        Ok(Self {
            samples: parsed.samples,
            bounding_box: parsed.bounding_box,
            raw: payload,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
