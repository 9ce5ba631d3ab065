//! In-memory cache of transpiled stages keyed by content hash.
//!
//! The engine feeds the same shader programs through the transpiler every
//! time a pipeline is (re)created; hashing the caller-supplied key bytes
//! (typically the encoded method body plus stage tag) makes repeat requests
//! free. Changing emitter options invalidates everything.

use std::collections::HashMap;

use blake3::Hash;

use crate::{Options, TranspileError, TranspiledStage};

#[derive(Debug, Clone)]
pub struct CachedStage {
    pub hash: Hash,
    pub stage: TranspiledStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCacheLookupSource {
    /// The stage was already present in the in-memory cache.
    Memory,
    /// The transpiler ran and the output was inserted into the cache.
    Transpiled,
}

#[derive(Debug, Clone, Copy)]
pub struct StageCacheLookup<'a> {
    pub source: StageCacheLookupSource,
    cached: &'a CachedStage,
}

impl std::ops::Deref for StageCacheLookup<'_> {
    type Target = CachedStage;

    fn deref(&self) -> &Self::Target {
        self.cached
    }
}

pub struct StageCache {
    map: HashMap<Hash, CachedStage>,
    options: Options,
}

impl StageCache {
    pub fn new(options: Options) -> Self {
        Self {
            map: HashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn set_options(&mut self, options: Options) {
        if self.options != options {
            self.options = options;
            self.map.clear();
        }
    }

    /// Looks up `key`, running `transpile` on a miss.
    pub fn get_or_transpile(
        &mut self,
        key: &[u8],
        transpile: impl FnOnce(Options) -> Result<TranspiledStage, TranspileError>,
    ) -> Result<StageCacheLookup<'_>, TranspileError> {
        use std::collections::hash_map::Entry;

        let hash = blake3::hash(key);
        match self.map.entry(hash) {
            Entry::Occupied(e) => Ok(StageCacheLookup {
                source: StageCacheLookupSource::Memory,
                cached: e.into_mut(),
            }),
            Entry::Vacant(e) => {
                let stage = transpile(self.options)?;
                let hash = *e.key();
                Ok(StageCacheLookup {
                    source: StageCacheLookupSource::Transpiled,
                    cached: e.insert(CachedStage { hash, stage }),
                })
            }
        }
    }
}

impl Default for StageCache {
    fn default() -> Self {
        Self::new(Options::default())
    }
}
