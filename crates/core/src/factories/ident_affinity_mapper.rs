//! The default affinity mapper: co-location by identity.

use gridmesh_api::affinity::*;
use gridmesh_api::builder::Builder;
use gridmesh_api::config::Config;
use gridmesh_api::*;
use std::sync::Arc;

/// Factory for the identity affinity mapper.
#[derive(Debug)]
pub struct IdentAffinityMapperFactory {}

impl IdentAffinityMapperFactory {
    /// Construct a new IdentAffinityMapperFactory.
    pub fn create() -> DynAffinityMapperFactory {
        let out: DynAffinityMapperFactory = Arc::new(Self {});
        out
    }
}

impl AffinityMapperFactory for IdentAffinityMapperFactory {
    fn default_config(&self, _config: &mut Config) -> MeshResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &Config) -> MeshResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<Builder>,
    ) -> BoxFut<'static, MeshResult<DynAffinityMapper>> {
        Box::pin(async move {
            let out: DynAffinityMapper = Arc::new(IdentAffinityMapper);
            Ok(out)
        })
    }
}

/// Affinity mapper returning the key itself: entries are co-located by
/// key identity.
#[derive(Debug)]
struct IdentAffinityMapper;

impl AffinityMapper for IdentAffinityMapper {
    fn affinity_key(&self, key: &Key) -> AffinityKey {
        AffinityKey(key.0.clone())
    }

    fn reset(&self) {
        // no transient state
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_mapping() {
        let mapper = IdentAffinityMapper;
        let key = Key::from("some-key");
        assert_eq!(key.0, mapper.affinity_key(&key).0);
        mapper.reset();
        assert_eq!(key.0, mapper.affinity_key(&key).0);
    }
}
