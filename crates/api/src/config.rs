//! Types for use when configuring gridmesh modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> MeshResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| MeshError::other_src("encode", e))?,
    )
    .map_err(|e| MeshError::other_src("decode", e))
}

/// Denotes a type used to configure a specific gridmesh module.
///
/// The types defined in this struct are specifically for configuration
/// that cannot be changed at runtime, the likes of which might be found
/// in a configuration file.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Gridmesh configuration.
///
/// A json map of module name to module config. Loaded from disk and
/// editable by humans, so module config serialization should tolerate
/// missing properties with sane defaults.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Called by module factories while the builder is generating a
    /// default or example configuration file, to add their default
    /// parameters to it.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
    ) -> MeshResult<()> {
        if self.0.contains_key(&module_name) {
            return Err(MeshError::config(format!(
                "refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// Extract a module config. Unset modules get the default.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> MeshResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}
