use super::{EnumSpec, FileSpec, MessageSpec, ServiceSpec};
use crate::error::Result;
use prost_reflect::{DescriptorPool, FileDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Specs for a group of files, with lookups by fully qualified name that
/// cross file boundaries.
///
/// A service usually reaches messages declared in the files it imports, and
/// their field options and comments live in those files' specs.
#[derive(Debug, Clone, Default)]
pub struct FileSpecSet {
    files: Vec<Arc<FileSpec>>,
    messages: HashMap<String, (usize, usize)>,
    enums: HashMap<String, (usize, usize)>,
    services: HashMap<String, (usize, usize)>,
}

impl FileSpecSet {
    /// Every file of `pool`.
    pub fn new(pool: &DescriptorPool, is_camel: bool) -> Result<Self> {
        let files = pool
            .files()
            .map(|file| FileSpec::new(file, None, is_camel).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_files(files))
    }

    /// `file` and everything it imports, transitively.
    pub fn with_dependencies(file: FileDescriptor, is_camel: bool) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut pending = vec![file];
        let mut files = Vec::new();
        while let Some(file) = pending.pop() {
            if !seen.insert(file.name().to_string()) {
                continue;
            }
            pending.extend(file.dependencies());
            files.push(Arc::new(FileSpec::new(file, None, is_camel)?));
        }
        Ok(Self::from_files(files))
    }

    pub fn from_files(files: impl IntoIterator<Item = Arc<FileSpec>>) -> Self {
        let mut set = Self::default();
        for file in files {
            let idx = set.files.len();
            for (i, m) in file.messages().iter().enumerate() {
                set.messages.insert(m.full_name().to_string(), (idx, i));
            }
            for (i, e) in file.enums().iter().enumerate() {
                set.enums.insert(e.full_name().to_string(), (idx, i));
            }
            for (i, s) in file.services().iter().enumerate() {
                set.services.insert(s.full_name().to_string(), (idx, i));
            }
            set.files.push(file);
        }
        set
    }

    pub fn files(&self) -> &[Arc<FileSpec>] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&Arc<FileSpec>> {
        self.files.iter().find(|f| f.name() == name)
    }

    pub fn message(&self, full_name: &str) -> Option<&MessageSpec> {
        let &(file, i) = self.messages.get(full_name)?;
        self.files[file].messages().get(i)
    }

    pub fn enum_spec(&self, full_name: &str) -> Option<&EnumSpec> {
        let &(file, i) = self.enums.get(full_name)?;
        self.files[file].enums().get(i)
    }

    /// A service and the file declaring it.
    pub fn service(&self, full_name: &str) -> Option<(&Arc<FileSpec>, &ServiceSpec)> {
        let &(file, i) = self.services.get(full_name)?;
        let file = &self.files[file];
        file.services().get(i).map(|s| (file, s))
    }

    /// Every service, in file order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> + '_ {
        self.files.iter().flat_map(|f| f.services().iter())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
