use thiserror::Error;

/// A Linux errno value.
///
/// Only the values the time subsystem actually produces are defined as
/// constants; the numeric code is the x86-64 Linux assignment.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Error)]
#[error("errno {} ({})", self.0, self.name())]
pub struct Errno(u32);

/// Invalid argument.
pub const EINVAL: Errno = Errno(22);

impl Errno {
    pub const fn code(self) -> u32 {
        self.0
    }

    fn name(self) -> &'static str {
        match self.0 {
            22 => "EINVAL",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn einval_formats_with_name() {
        assert_eq!(EINVAL.code(), 22);
        assert_eq!(EINVAL.to_string(), "errno 22 (EINVAL)");
    }
}
