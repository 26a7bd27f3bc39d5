use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use goblin::elf::program_header;

use crate::{
    chip::{transceiver::Transceiver, CoreLocation, CoreSubsets},
    config::PlatformConfig,
    error::{LoadError, Result},
};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// An executable image and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    pub path: PathBuf,
    bytes: Vec<u8>,
}

impl BinaryImage {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
        })
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes the image occupies once loaded.
    ///
    /// Raw images are their own length. For ELF images this is the larger of
    /// the file length and the summed memory size of the loadable segments,
    /// so zero-filled sections count against the ceiling too.
    pub fn footprint(&self) -> u64 {
        let len = self.len();
        if !self.bytes.starts_with(ELF_MAGIC) {
            return len;
        }

        match goblin::elf::Elf::parse(&self.bytes) {
            Ok(elf) => {
                let loaded: u64 = elf
                    .program_headers
                    .iter()
                    .filter(|header| header.p_type == program_header::PT_LOAD)
                    .map(|header| header.p_memsz)
                    .sum();
                len.max(loaded)
            }
            Err(err) => {
                tracing::warn!(
                    "{}: looks like ELF but failed to parse ({err}), using file length",
                    self.path.display()
                );
                len
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySize {
    Ok,
    /// Over the safe ceiling but still loadable.
    AboveSafe,
}

pub fn check_binary_size(image: &BinaryImage, config: &PlatformConfig) -> Result<BinarySize> {
    let size = image.footprint();
    if size > config.max_possible_binary_size {
        return Err(LoadError::BinaryTooLarge {
            path: image.path.clone(),
            size,
            limit: config.max_possible_binary_size,
        });
    }

    if size > config.max_safe_binary_size {
        tracing::warn!(
            "{}: {} bytes is above the safe ceiling of {} bytes and may not run",
            image.path.display(),
            size,
            config.max_safe_binary_size
        );
        return Ok(BinarySize::AboveSafe);
    }

    Ok(BinarySize::Ok)
}

/// Broadcasts `image` to every core in `cores` and starts it under `app_id`.
///
/// The size ceiling is checked before anything is sent.
pub fn load_and_flood<T: Transceiver + ?Sized>(
    transceiver: &mut T,
    image: &BinaryImage,
    cores: &CoreSubsets,
    app_id: u8,
    config: &PlatformConfig,
) -> Result<()> {
    check_binary_size(image, config)?;

    if cores.is_empty() {
        tracing::debug!("{}: no cores to load", image.path.display());
        return Ok(());
    }

    tracing::info!(
        "{}: flooding {} bytes to {} cores under app {app_id}",
        image.path.display(),
        image.len(),
        cores.len()
    );
    transceiver.execute_flood(cores, image.bytes(), app_id)?;

    Ok(())
}

/// Resolves binary names against an ordered list of directories.
#[derive(Debug, Clone, Default)]
pub struct ExecutableFinder {
    search_paths: Vec<PathBuf>,
}

impl ExecutableFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Later additions are searched first.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.insert(0, path.into());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    pub fn get_executable_path(&self, name: &str) -> Result<PathBuf> {
        self.find(name)
            .ok_or_else(|| LoadError::ExecutableNotFound(name.to_string()))
    }
}

/// Which cores run which binary. A core belongs to at most one binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutableTargets {
    targets: BTreeMap<PathBuf, CoreSubsets>,
    owners: HashMap<CoreLocation, PathBuf>,
}

impl ExecutableTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(&mut self, binary: &Path, core: CoreLocation) -> Result<()> {
        if let Some(existing) = self.owners.get(&core) {
            if existing != binary {
                return Err(LoadError::DuplicateExecutableTarget {
                    core,
                    existing: existing.clone(),
                    requested: binary.to_path_buf(),
                });
            }
            return Ok(());
        }

        self.owners.insert(core, binary.to_path_buf());
        self.targets
            .entry(binary.to_path_buf())
            .or_default()
            .add_processor(core);
        Ok(())
    }

    pub fn has_binary(&self, binary: &Path) -> bool {
        self.targets.contains_key(binary)
    }

    pub fn cores_for(&self, binary: &Path) -> Option<&CoreSubsets> {
        self.targets.get(binary)
    }

    pub fn binary_for(&self, core: CoreLocation) -> Option<&Path> {
        self.owners.get(&core).map(|p| p.as_path())
    }

    pub fn total_processors(&self) -> usize {
        self.owners.len()
    }

    pub fn n_binaries(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &CoreSubsets)> {
        self.targets.iter().map(|(path, cores)| (path.as_path(), cores))
    }
}

/// Reads and floods every binary in `targets` under `app_id`.
///
/// All images are read and size checked before the first flood.
pub fn load_executable_images<T: Transceiver + ?Sized>(
    transceiver: &mut T,
    targets: &ExecutableTargets,
    app_id: u8,
    config: &PlatformConfig,
) -> Result<usize> {
    let mut images = Vec::with_capacity(targets.n_binaries());
    for (path, cores) in targets.iter() {
        let image = BinaryImage::from_file(path)?;
        check_binary_size(&image, config)?;
        images.push((image, cores));
    }

    for (image, cores) in &images {
        load_and_flood(transceiver, image, cores, app_id, config)?;
    }

    Ok(targets.total_processors())
}
