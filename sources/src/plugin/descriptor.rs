//! Source Descriptor Types
//!
//! A descriptor is the static declaration of one hardware backend: the label
//! shown to users, the identifier of the native module implementing it and
//! what the backend is able to do. Descriptors are built once at startup and
//! never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Capabilities a backend advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceCapabilities {
    /// The module exports `tsdrplugin_getsamplerate` and may be queried
    #[serde(default)]
    pub sample_rate_query: bool,

    /// `module_id` is a filesystem path to the module rather than a name
    /// resolved against the search paths
    #[serde(default)]
    pub absolute_path: bool,
}

impl SourceCapabilities {
    /// No optional capability
    pub const NONE: Self = Self {
        sample_rate_query: false,
        absolute_path: false,
    };

    pub const fn with_sample_rate_query(mut self, enabled: bool) -> Self {
        self.sample_rate_query = enabled;
        self
    }

    pub const fn with_absolute_path(mut self, enabled: bool) -> Self {
        self.absolute_path = enabled;
        self
    }
}

/// Inclusive numeric bounds for a tunable parameter (Hz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Immutable description of a registered source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    display_name: String,
    module_id: String,
    capabilities: SourceCapabilities,
    #[serde(default)]
    frequency_bounds: Option<Bounds>,
    #[serde(default)]
    sample_rate_bounds: Option<Bounds>,
    #[serde(default)]
    default_params: String,
    #[serde(default)]
    description: String,
}

impl SourceDescriptor {
    /// Declare a source
    ///
    /// # Arguments
    /// * `display_name` - Label used to look the source up (e.g. "Soapy")
    /// * `module_id` - Native module identifier (e.g. "TSDRPlugin_Soapy")
    /// * `supports_sample_rate_query` - Whether the sample rate may be queried
    pub fn new(
        display_name: impl Into<String>,
        module_id: impl Into<String>,
        supports_sample_rate_query: bool,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            module_id: module_id.into(),
            capabilities: SourceCapabilities::NONE
                .with_sample_rate_query(supports_sample_rate_query),
            frequency_bounds: None,
            sample_rate_bounds: None,
            default_params: String::new(),
            description: String::new(),
        }
    }

    /// Replace the whole capability set
    pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Declare the tunable center frequency range
    pub fn with_frequency_bounds(mut self, min_hz: u64, max_hz: u64) -> Self {
        self.frequency_bounds = Some(Bounds::new(min_hz, max_hz));
        self
    }

    /// Declare the supported sample rate range
    pub fn with_sample_rate_bounds(mut self, min_hz: u64, max_hz: u64) -> Self {
        self.sample_rate_bounds = Some(Bounds::new(min_hz, max_hz));
        self
    }

    /// Parameter string passed to native init when none is supplied
    pub fn with_default_params(mut self, params: impl Into<String>) -> Self {
        self.default_params = params.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn supports_sample_rate_query(&self) -> bool {
        self.capabilities.sample_rate_query
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    pub fn frequency_bounds(&self) -> Option<Bounds> {
        self.frequency_bounds
    }

    pub fn sample_rate_bounds(&self) -> Option<Bounds> {
        self.sample_rate_bounds
    }

    pub fn default_params(&self) -> &str {
        &self.default_params
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}
