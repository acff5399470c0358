use std::fmt;

use crate::release::ReleaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    MacOS,
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// `<os>-<arch>` as used in get.helm.sh archive names and their top-level
    /// directory.
    pub fn helm_target(&self) -> String {
        let os = match self.os {
            Os::MacOS => "darwin",
            Os::Linux => "linux",
            Os::Windows => "windows",
        };
        let arch = match self.arch {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        };
        format!("{os}-{arch}")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.helm_target())
    }
}

pub fn detect() -> Result<Platform, ReleaseError> {
    from_consts(std::env::consts::OS, std::env::consts::ARCH)
}

fn from_consts(os: &str, arch: &str) -> Result<Platform, ReleaseError> {
    let os = match os {
        "macos" => Os::MacOS,
        "linux" => Os::Linux,
        "windows" => Os::Windows,
        other => return Err(ReleaseError::UnsupportedPlatform(format!("OS {other}"))),
    };

    let arch = match arch {
        "x86_64" => Arch::Amd64,
        "aarch64" => Arch::Arm64,
        other => {
            return Err(ReleaseError::UnsupportedPlatform(format!(
                "architecture {other}"
            )))
        }
    };

    Ok(Platform { os, arch })
}
