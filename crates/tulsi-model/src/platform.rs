use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BazelFlags;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Ios,
    Macos,
    Tvos,
    Watchos,
}

impl PlatformType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformType::Ios => "ios",
            PlatformType::Macos => "macos",
            PlatformType::Tvos => "tvos",
            PlatformType::Watchos => "watchos",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(PlatformType::Ios),
            // Older aspects report macOS as `darwin`.
            "macos" | "darwin" => Ok(PlatformType::Macos),
            "tvos" => Ok(PlatformType::Tvos),
            "watchos" => Ok(PlatformType::Watchos),
            other => Err(UnknownValue {
                kind: "platform type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArch {
    I386,
    X86_64,
    Armv7,
    Armv7k,
    Arm64,
    Arm64e,
    Arm64_32,
    SimArm64,
}

impl CpuArch {
    pub fn as_str(self) -> &'static str {
        match self {
            CpuArch::I386 => "i386",
            CpuArch::X86_64 => "x86_64",
            CpuArch::Armv7 => "armv7",
            CpuArch::Armv7k => "armv7k",
            CpuArch::Arm64 => "arm64",
            CpuArch::Arm64e => "arm64e",
            CpuArch::Arm64_32 => "arm64_32",
            CpuArch::SimArm64 => "sim_arm64",
        }
    }

    /// Physical-device architectures.
    pub fn is_device(self) -> bool {
        matches!(
            self,
            CpuArch::Armv7 | CpuArch::Armv7k | CpuArch::Arm64 | CpuArch::Arm64e | CpuArch::Arm64_32
        )
    }

    /// Watch CPUs an iOS build for this CPU must pin, since an iOS app may
    /// embed a watch app. A 64-bit iOS device can be paired with either a
    /// 32-bit or a 64-bit watch, and the pairing is unknown at generation time.
    pub fn companion_watch_cpus(self) -> &'static [CpuArch] {
        match self {
            CpuArch::Arm64 | CpuArch::Arm64e => &[CpuArch::Armv7k, CpuArch::Arm64_32],
            CpuArch::Armv7 | CpuArch::Armv7k | CpuArch::Arm64_32 => &[CpuArch::Armv7k],
            CpuArch::SimArm64 => &[CpuArch::Arm64],
            CpuArch::I386 | CpuArch::X86_64 => &[CpuArch::I386],
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CpuArch {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "i386" => CpuArch::I386,
            "x86_64" => CpuArch::X86_64,
            "armv7" => CpuArch::Armv7,
            "armv7k" => CpuArch::Armv7k,
            "arm64" => CpuArch::Arm64,
            "arm64e" => CpuArch::Arm64e,
            "arm64_32" => CpuArch::Arm64_32,
            "sim_arm64" => CpuArch::SimArm64,
            other => {
                return Err(UnknownValue {
                    kind: "cpu",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// The (platform, CPU) pair the IDE is configured to build for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformConfiguration {
    pub platform: PlatformType,
    pub cpu: CpuArch,
}

impl Default for PlatformConfiguration {
    fn default() -> Self {
        Self {
            platform: PlatformType::Ios,
            cpu: CpuArch::X86_64,
        }
    }
}

impl PlatformConfiguration {
    pub fn new(platform: PlatformType, cpu: CpuArch) -> Self {
        Self { platform, cpu }
    }

    /// Build flags that make Bazel target exactly this platform and CPU.
    pub fn bazel_flags(&self) -> BazelFlags {
        let mut build = vec![format!("--apple_platform_type={}", self.platform)];
        match self.platform {
            PlatformType::Ios => build.push(format!("--cpu=ios_{}", self.cpu)),
            PlatformType::Macos => build.push(format!("--cpu=darwin_{}", self.cpu)),
            PlatformType::Tvos => build.push(format!("--tvos_cpus={}", self.cpu)),
            PlatformType::Watchos => build.push(format!("--watchos_cpus={}", self.cpu)),
        }

        if self.platform == PlatformType::Ios {
            let watch_cpus = self
                .cpu
                .companion_watch_cpus()
                .iter()
                .map(|cpu| cpu.as_str())
                .collect::<Vec<_>>()
                .join(",");
            build.push(format!("--watchos_cpus={watch_cpus}"));
        }

        BazelFlags::build_only(build)
    }
}
