use tulsi_model::{BazelFlags, BazelFlagsSet, CompilationMode, PlatformConfiguration};

/// User-supplied options, already split into argv form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBuildOptions {
    pub startup: Vec<String>,
    pub build: Vec<String>,
    pub debug_build: Vec<String>,
    pub release_build: Vec<String>,
}

impl UserBuildOptions {
    pub fn flags_set(&self) -> BazelFlagsSet {
        let shared = BazelFlags::new(self.startup.clone(), self.build.clone());
        BazelFlagsSet::uniform(shared)
            + BazelFlagsSet::per_mode(
                BazelFlags::build_only(self.debug_build.clone()),
                BazelFlags::build_only(self.release_build.clone()),
            )
    }
}

/// Computes the flags that make a Bazel invocation match the configuration
/// the generated project builds with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BazelSettingsProvider {
    platform: PlatformConfiguration,
}

impl BazelSettingsProvider {
    pub fn new(platform: PlatformConfiguration) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> PlatformConfiguration {
        self.platform
    }

    pub fn compilation_mode_flags() -> BazelFlagsSet {
        let mode = |mode: CompilationMode| format!("--compilation_mode={}", mode.bazel_value());
        BazelFlagsSet::per_mode(
            BazelFlags::build_only([mode(CompilationMode::Debug)]),
            BazelFlags::build_only([
                mode(CompilationMode::Release),
                "--strip=always".to_string(),
                "--apple_generate_dsym".to_string(),
            ]),
        )
    }

    /// Mode flags, then platform flags, then the user's options.
    pub fn flags_set(&self, options: &UserBuildOptions) -> BazelFlagsSet {
        Self::compilation_mode_flags() + self.platform.bazel_flags() + options.flags_set()
    }

    pub fn flags(&self, mode: CompilationMode, options: &UserBuildOptions) -> BazelFlags {
        self.flags_set(options).flags(mode).clone()
    }
}
