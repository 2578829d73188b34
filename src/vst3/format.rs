use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use super::instance::Vst3Instance;
use super::module::{ClassInfo, Vst3Module};
use crate::host::format::{
    AudioPluginFormat, InstanceResult, PluginDescription, PluginInstance, VST3_FORMAT_NAME,
};

/// VST3 support for [`crate::host::FormatManager`].
///
/// Modules stay loaded while any description lookup or instance uses them,
/// so scanning a bundle and then instantiating it opens the library once.
#[derive(Default)]
pub struct Vst3Format {
    modules: Mutex<HashMap<PathBuf, Weak<Vst3Module>>>,
}

impl Vst3Format {
    pub fn new() -> Self {
        Self::default()
    }

    fn module(&self, path: &Path) -> anyhow::Result<Arc<Vst3Module>> {
        let mut modules = match self.modules.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(module) = modules.get(path).and_then(Weak::upgrade) {
            return Ok(module);
        }
        modules.retain(|_, weak| weak.strong_count() > 0);
        let module = Vst3Module::load(path)?;
        modules.insert(path.to_path_buf(), Arc::downgrade(&module));
        Ok(module)
    }
}

pub fn describe(path: &Path, class: &ClassInfo) -> PluginDescription {
    PluginDescription {
        name: class.name.clone(),
        manufacturer: class.vendor.clone(),
        version: class.version.clone(),
        category: class.sub_categories.clone(),
        path: path.to_path_buf(),
        uid: class.cid,
        is_instrument: class.is_instrument(),
    }
}

impl AudioPluginFormat for Vst3Format {
    fn name(&self) -> &str {
        VST3_FORMAT_NAME
    }

    fn find_all_types_for_file(&self, path: &Path) -> Vec<PluginDescription> {
        let module = match self.module(path) {
            Ok(module) => module,
            Err(e) => {
                log::warn!("Could not open {}: {:#}", path.display(), e);
                return Vec::new();
            }
        };
        module
            .classes()
            .iter()
            .filter(|class| class.is_audio_module())
            .map(|class| describe(path, class))
            .collect()
    }

    fn create_instance(
        &self,
        description: &PluginDescription,
        sample_rate: f64,
        block_size: usize,
    ) -> InstanceResult {
        let module = self
            .module(&description.path)
            .map_err(|e| format!("{e:#}"))?;
        let instance = Vst3Instance::create(module, description.clone(), sample_rate, block_size)?;
        Ok(Box::new(instance) as Box<dyn PluginInstance>)
    }
}
