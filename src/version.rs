use crate::weak_error;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};

/// Backend (GDB) version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub (u32, u32, u32));

impl Version {
    /// Parse gdb version from the first line of `gdb --version` or `-gdb-version` output, like:
    /// "GNU gdb (Ubuntu 12.1-0ubuntu1~22.04) 12.1" or "GNU gdb (GDB) 7.2.50.20100728".
    pub fn gdb_parse(s: &str) -> Option<Self> {
        static V_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
            Regex::new(r"\b(\d+)\.(\d+)(?:\.(\d+))?").expect("must compile")
        });

        let line = s.lines().find(|l| l.contains("GNU gdb"))?;
        // the version always comes last, package names in parentheses may contain numbers too
        let captures = V_RE.captures_iter(line).last()?;

        let major = weak_error!(captures[1].parse::<u32>())?;
        let minor = weak_error!(captures[2].parse::<u32>())?;
        let patch = match captures.get(3) {
            None => 0,
            Some(m) => weak_error!(m.as_str().parse::<u32>())?,
        };
        Some(Version((major, minor, patch)))
    }
}

impl Default for Version {
    fn default() -> Self {
        // the first version with non-stop support is default
        Version((7, 0, 0))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Execute expression depending on backend version.
#[macro_export]
macro_rules! version_switch {
            ($v:expr, $($v1:tt ..= $v2:expr => $code: expr),+ $(,)?) => {
                $(
                    if $v >= $crate::version::Version($v1) && $v <= $crate::version::Version($v2) {
                        Some($code)
                    } else
                )*
                {
                    None
                }
            };
        }
