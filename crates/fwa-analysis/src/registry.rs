//! # Analyzer Registry
//!
//! Populated once at startup, read-only afterwards. Analyzers are stored
//! per input family, so a lookup returns a statically typed
//! `Arc<dyn Analyzer<I>>` without any runtime downcast. Each id belongs to
//! exactly one family; looking it up under another family is a
//! [`AnalyzerError::KindMismatch`].

use std::collections::HashMap;
use std::sync::Arc;

use fwa_core::AnalyzerId;
use thiserror::Error;

use crate::analyzer::Analyzer;
use crate::error::AnalyzerError;
use crate::input::{AnalyzerInput, DiffRegionsInput, ImageInfoInput, StableHashMatchInput};
use crate::request::AnalyzerKind;

type Table<I> = HashMap<AnalyzerId, Arc<dyn Analyzer<I>>>;

/// Registration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("analyzer {id} is already registered for {kind} input")]
    Duplicate { id: AnalyzerId, kind: AnalyzerKind },
}

/// Links an input type to its family and its table in the registry.
pub trait InputFamily: AnalyzerInput + Sized {
    const KIND: AnalyzerKind;

    fn table(registry: &AnalyzerRegistry) -> &Table<Self>;

    fn table_mut(registry: &mut AnalyzerRegistry) -> &mut Table<Self>;
}

/// Analyzer implementations by id, per input family.
#[derive(Default)]
pub struct AnalyzerRegistry {
    kinds: HashMap<AnalyzerId, AnalyzerKind>,
    image_info: Table<ImageInfoInput>,
    stable_hash_match: Table<StableHashMatchInput>,
    diff_regions: Table<DiffRegionsInput>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in analyzers under their default ids.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert::<ImageInfoInput>(Arc::new(crate::analyzers::ImageInfo));
        registry.insert::<StableHashMatchInput>(Arc::new(crate::analyzers::StableHashMatch));
        registry.insert::<DiffRegionsInput>(Arc::new(crate::analyzers::DiffRegions));
        registry
    }

    pub fn register<I: InputFamily>(
        &mut self,
        analyzer: Arc<dyn Analyzer<I>>,
    ) -> Result<(), RegistryError> {
        let id = analyzer.id();
        if let Some(kind) = self.kinds.get(&id) {
            return Err(RegistryError::Duplicate { id, kind: *kind });
        }
        self.insert(analyzer);
        Ok(())
    }

    fn insert<I: InputFamily>(&mut self, analyzer: Arc<dyn Analyzer<I>>) {
        let id = analyzer.id();
        self.kinds.insert(id.clone(), I::KIND);
        I::table_mut(self).insert(id, analyzer);
    }

    /// Analyzer `id` of family `I`.
    pub fn get<I: InputFamily>(&self, id: &AnalyzerId) -> Result<Arc<dyn Analyzer<I>>, AnalyzerError> {
        match self.kinds.get(id) {
            None => Err(AnalyzerError::UnknownAnalyzer(id.clone())),
            Some(kind) if *kind != I::KIND => Err(AnalyzerError::KindMismatch {
                id: id.clone(),
                registered: *kind,
                requested: I::KIND,
            }),
            Some(_) => I::table(self)
                .get(id)
                .cloned()
                .ok_or_else(|| AnalyzerError::UnknownAnalyzer(id.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Registered ids with their family, sorted by id.
    pub fn ids(&self) -> Vec<(AnalyzerId, AnalyzerKind)> {
        let mut ids: Vec<_> = self.kinds.iter().map(|(id, k)| (id.clone(), *k)).collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }
}

impl InputFamily for ImageInfoInput {
    const KIND: AnalyzerKind = AnalyzerKind::ImageInfo;

    fn table(registry: &AnalyzerRegistry) -> &Table<Self> {
        &registry.image_info
    }

    fn table_mut(registry: &mut AnalyzerRegistry) -> &mut Table<Self> {
        &mut registry.image_info
    }
}

impl InputFamily for StableHashMatchInput {
    const KIND: AnalyzerKind = AnalyzerKind::StableHashMatch;

    fn table(registry: &AnalyzerRegistry) -> &Table<Self> {
        &registry.stable_hash_match
    }

    fn table_mut(registry: &mut AnalyzerRegistry) -> &mut Table<Self> {
        &mut registry.stable_hash_match
    }
}

impl InputFamily for DiffRegionsInput {
    const KIND: AnalyzerKind = AnalyzerKind::DiffRegions;

    fn table(registry: &AnalyzerRegistry) -> &Table<Self> {
        &registry.diff_regions
    }

    fn table_mut(registry: &mut AnalyzerRegistry) -> &mut Table<Self> {
        &mut registry.diff_regions
    }
}
