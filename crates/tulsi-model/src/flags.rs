use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Startup and build flags for one Bazel invocation.
///
/// Concatenation keeps order: flags from the left-hand side come first, so an
/// inherited base set followed by overrides reads `base + overrides`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BazelFlags {
    #[serde(default)]
    pub startup: Vec<String>,
    #[serde(default)]
    pub build: Vec<String>,
}

impl BazelFlags {
    pub fn new<S, B>(startup: S, build: B) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            startup: startup.into_iter().map(Into::into).collect(),
            build: build.into_iter().map(Into::into).collect(),
        }
    }

    pub fn build_only<B>(build: B) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self::new(Vec::<String>::new(), build)
    }

    pub fn is_empty(&self) -> bool {
        self.startup.is_empty() && self.build.is_empty()
    }
}

impl Add for BazelFlags {
    type Output = BazelFlags;

    fn add(mut self, rhs: BazelFlags) -> BazelFlags {
        self += rhs;
        self
    }
}

impl Add<&BazelFlags> for &BazelFlags {
    type Output = BazelFlags;

    fn add(self, rhs: &BazelFlags) -> BazelFlags {
        self.clone() + rhs.clone()
    }
}

impl AddAssign for BazelFlags {
    fn add_assign(&mut self, rhs: BazelFlags) {
        self.startup.extend(rhs.startup);
        self.build.extend(rhs.build);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationMode {
    Debug,
    Release,
}

impl CompilationMode {
    /// Value for Bazel's `--compilation_mode`.
    pub fn bazel_value(self) -> &'static str {
        match self {
            CompilationMode::Debug => "dbg",
            CompilationMode::Release => "opt",
        }
    }
}

/// Flags split by compilation mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BazelFlagsSet {
    pub debug: BazelFlags,
    pub release: BazelFlags,
}

impl BazelFlagsSet {
    /// The same flags for every compilation mode.
    pub fn uniform(flags: BazelFlags) -> Self {
        Self {
            debug: flags.clone(),
            release: flags,
        }
    }

    pub fn per_mode(debug: BazelFlags, release: BazelFlags) -> Self {
        Self { debug, release }
    }

    pub fn flags(&self, mode: CompilationMode) -> &BazelFlags {
        match mode {
            CompilationMode::Debug => &self.debug,
            CompilationMode::Release => &self.release,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.debug == self.release
    }

    /// The single flag set to emit when every mode agrees.
    pub fn collapsed(&self) -> Option<&BazelFlags> {
        self.is_uniform().then_some(&self.debug)
    }
}

impl Add for BazelFlagsSet {
    type Output = BazelFlagsSet;

    fn add(self, rhs: BazelFlagsSet) -> BazelFlagsSet {
        BazelFlagsSet {
            debug: self.debug + rhs.debug,
            release: self.release + rhs.release,
        }
    }
}

impl Add<BazelFlags> for BazelFlagsSet {
    type Output = BazelFlagsSet;

    fn add(self, rhs: BazelFlags) -> BazelFlagsSet {
        self + BazelFlagsSet::uniform(rhs)
    }
}
