use std::{env, str::FromStr};

use log::warn;

/// Interpreter dialects with distinct behaviour in the VM, views and kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SciVersion {
    Sci0Early,
    Sci0,
    Sci01,
    Sci1Ega,
    Sci1,
    Sci11,
}

impl SciVersion {
    /// lofsa/lofss operands are absolute script offsets rather than ip-relative
    pub fn absolute_lofs(self) -> bool {
        self >= SciVersion::Sci11
    }

    pub fn vga_views(self) -> bool {
        self >= SciVersion::Sci1
    }

    pub fn actor_scaling(self) -> bool {
        self >= SciVersion::Sci11
    }

    /// SCI1 movers track xLast/yLast and the client's hit-obstacle signal
    pub fn tracks_obstacles(self) -> bool {
        self >= SciVersion::Sci1Ega
    }
}

impl FromStr for SciVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sci0early" | "sci0-early" => Ok(SciVersion::Sci0Early),
            "sci0" => Ok(SciVersion::Sci0),
            "sci01" => Ok(SciVersion::Sci01),
            "sci1ega" | "sci1-ega" => Ok(SciVersion::Sci1Ega),
            "sci1" => Ok(SciVersion::Sci1),
            "sci11" | "sci1.1" => Ok(SciVersion::Sci11),
            _ => Err(format!("unknown SCI version '{s}'")),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectorPolicy {
    Continue,
    Stop,
}

impl FromStr for SelectorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(SelectorPolicy::Continue),
            "stop" => Ok(SelectorPolicy::Stop),
            _ => Err(format!("unknown selector policy '{s}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub version: SciVersion,
    pub selector_policy: SelectorPolicy,
    /// Number of opcodes between garbage collections, 0 disables periodic collection
    pub gc_interval: usize,
    pub max_list_recursion: usize,
    pub stack_size: usize,
    /// kWait really sleeps; tests turn this off
    pub throttle: bool,
    /// Kernel calls with no handler return 0 instead of stopping the game
    pub stub_missing_kernel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: SciVersion::Sci0,
            selector_policy: SelectorPolicy::Continue,
            gc_interval: 20_000,
            max_list_recursion: 4,
            stack_size: 0x1000,
            throttle: true,
            stub_missing_kernel: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with SCI_VERSION, SCI_GC_INTERVAL, SCI_SELECTOR_POLICY and
    /// SCI_STUB_MISSING_KERNEL
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(version) = env_value("SCI_VERSION") {
            config.version = version;
        }
        if let Some(interval) = env_value("SCI_GC_INTERVAL") {
            config.gc_interval = interval;
        }
        if let Some(policy) = env_value("SCI_SELECTOR_POLICY") {
            config.selector_policy = policy;
        }
        if let Some(stub) = env_value("SCI_STUB_MISSING_KERNEL") {
            config.stub_missing_kernel = stub;
        }
        config
    }

    pub fn headless() -> Self {
        Self {
            throttle: false,
            ..Self::default()
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {name}={value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("sci0", SciVersion::Sci0; "sci0")]
    #[test_case("SCI01", SciVersion::Sci01; "upper case")]
    #[test_case("sci1.1", SciVersion::Sci11; "dotted")]
    fn parses_versions(s: &str, expected: SciVersion) {
        assert_eq!(s.parse::<SciVersion>(), Ok(expected));
    }

    #[test]
    fn dialect_switches() {
        assert!(!SciVersion::Sci0.absolute_lofs());
        assert!(SciVersion::Sci11.absolute_lofs());
        assert!(SciVersion::Sci1.vga_views());
        assert!(!SciVersion::Sci01.tracks_obstacles());
    }

    #[test]
    fn default_recursion_depth_is_four() {
        assert_eq!(EngineConfig::default().max_list_recursion, 4);
        assert!(!EngineConfig::headless().throttle);
    }
}
