//! Generation request and parameter types

use serde::{Deserialize, Serialize};

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Engine (model) identifier
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Maximum output size in tokens
    #[serde(default = "default_max_output_size")]
    pub max_output_size: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Sequences at which the service stops generating
    #[serde(default)]
    pub stop_markers: Vec<String>,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            max_output_size: default_max_output_size(),
            temperature: 0.0,
            top_p: default_top_p(),
            stop_markers: Vec::new(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl GenerationParams {
    pub fn with_max_output_size(mut self, max_output_size: u32) -> Self {
        self.max_output_size = max_output_size;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stop_marker(mut self, marker: impl Into<String>) -> Self {
        self.stop_markers.push(marker.into());
        self
    }
}

/// Declared type of a structured output field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    StringList,
}

/// One named, typed field of a structured output shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// Expected output shape declared by a structured call site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field
    pub fn optional_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }
}

/// A single request to the generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDescriptor>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
            schema: None,
        }
    }

    /// Mark this request as structured with the given output shape
    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn is_structured(&self) -> bool {
        self.schema.is_some()
    }
}

fn default_engine() -> String {
    "text-davinci-003".to_string()
}

fn default_max_output_size() -> u32 {
    50
}

fn default_top_p() -> f32 {
    1.0
}

fn default_required() -> bool {
    true
}
