use std::collections::HashMap;

use crate::config::{PackageConfig, RefitConfig};
use crate::version::PackageName;

/// The set of configured packages, keyed case-insensitively. Built once at
/// startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct PackageRegistry {
    packages: HashMap<PackageName, PackageConfig>,
    order: Vec<PackageName>,
}

impl PackageRegistry {
    pub fn from_config(config: &RefitConfig) -> Self {
        let mut packages = HashMap::new();
        let mut order = Vec::new();
        for pkg in &config.packages {
            let name = pkg.package_name();
            order.push(name.clone());
            packages.insert(name, pkg.clone());
        }
        Self { packages, order }
    }

    pub fn get(&self, name: &str) -> Option<&PackageConfig> {
        self.packages.get(&PackageName::new(name))
    }

    /// Packages in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &PackageConfig> {
        self.order.iter().filter_map(|name| self.packages.get(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
