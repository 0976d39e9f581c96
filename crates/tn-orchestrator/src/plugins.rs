//! Application plugins
//!
//! A plugin recognises one kind of application in a fresh checkout. The
//! controller uses the match to warn early about checkouts the build will
//! not handle; `list-plugins-cmd` enumerates what is installed.

use std::path::Path;

/// Detects one kind of application
pub trait AppPlugin: Send + Sync {
    /// Short identifier
    fn name(&self) -> &'static str;

    /// One-line description for listings
    fn description(&self) -> &'static str;

    /// Whether the checkout at `dir` is this kind of application
    fn detect(&self, dir: &Path) -> bool;

    /// Whether the container build can use the checkout as it is
    fn ready_to_build(&self) -> bool {
        false
    }
}

struct DockerfilePlugin;

impl AppPlugin for DockerfilePlugin {
    fn name(&self) -> &'static str {
        "dockerfile"
    }

    fn description(&self) -> &'static str {
        "Any application shipping its own Dockerfile"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("Dockerfile").is_file()
    }

    fn ready_to_build(&self) -> bool {
        true
    }
}

struct NodePlugin;

impl AppPlugin for NodePlugin {
    fn name(&self) -> &'static str {
        "nodejs"
    }

    fn description(&self) -> &'static str {
        "Node.js application (package.json)"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("package.json").is_file()
    }
}

struct PythonPlugin;

impl AppPlugin for PythonPlugin {
    fn name(&self) -> &'static str {
        "python"
    }

    fn description(&self) -> &'static str {
        "Python application (requirements.txt or pyproject.toml)"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("requirements.txt").is_file() || dir.join("pyproject.toml").is_file()
    }
}

struct StaticPlugin;

impl AppPlugin for StaticPlugin {
    fn name(&self) -> &'static str {
        "static"
    }

    fn description(&self) -> &'static str {
        "Static site (index.html)"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("index.html").is_file()
    }
}

/// Ordered set of plugins; the first match wins
pub struct PluginRegistry {
    plugins: Vec<Box<dyn AppPlugin>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PluginRegistry {
    /// Plugins shipped with the binary
    pub fn builtin() -> Self {
        Self {
            plugins: vec![
                Box::new(DockerfilePlugin),
                Box::new(NodePlugin),
                Box::new(PythonPlugin),
                Box::new(StaticPlugin),
            ],
        }
    }

    /// Add a plugin after the built-in ones
    pub fn register(&mut self, plugin: Box<dyn AppPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn AppPlugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    /// First plugin recognising the checkout at `dir`
    pub fn detect(&self, dir: &Path) -> Option<&dyn AppPlugin> {
        self.plugins().find(|p| p.detect(dir))
    }
}
