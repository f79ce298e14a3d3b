//! String storage with clone-on-write sharing.
//!
//! A string is owned, shared (refcounted backing), or static (points at
//! foreign memory that is never freed). Writers de-share or copy before
//! mutating; the shared backing is released when the last reference
//! drops.

use std::rc::Rc;

/// Strings below this length copy instead of sharing on `dup`.
pub const STR_SHARED_MIN: usize = 32;

#[derive(Debug, Clone)]
pub enum StrBacking {
    Owned(String),
    Shared(Rc<String>),
    Static(&'static str),
}

#[derive(Debug)]
pub struct StrData {
    backing: StrBacking,
}

impl StrData {
    pub fn new(text: impl Into<String>) -> Self {
        StrData {
            backing: StrBacking::Owned(text.into()),
        }
    }

    pub fn from_static(text: &'static str) -> Self {
        StrData {
            backing: StrBacking::Static(text),
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.backing {
            StrBacking::Owned(s) => s,
            StrBacking::Shared(s) => s,
            StrBacking::Static(s) => s,
        }
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.backing, StrBacking::Shared(_))
    }

    /// Copy-on-write gate: after this the backing is private.
    pub fn make_mut(&mut self) -> &mut String {
        match &mut self.backing {
            StrBacking::Owned(s) => s,
            other => {
                let copy = match other {
                    StrBacking::Shared(s) => s.as_str().to_owned(),
                    StrBacking::Static(s) => (*s).to_owned(),
                    StrBacking::Owned(_) => unreachable!("matched above"),
                };
                *other = StrBacking::Owned(copy);
                match other {
                    StrBacking::Owned(s) => s,
                    _ => unreachable!("just replaced"),
                }
            }
        }
    }

    pub fn concat(&mut self, other: &str) {
        self.make_mut().push_str(other);
    }

    /// Duplicate; long strings share the backing instead of copying.
    pub fn dup(&mut self) -> StrData {
        match &mut self.backing {
            StrBacking::Static(s) => StrData::from_static(s),
            StrBacking::Shared(s) => StrData {
                backing: StrBacking::Shared(s.clone()),
            },
            StrBacking::Owned(s) => {
                if s.len() >= STR_SHARED_MIN {
                    let shared = Rc::new(std::mem::take(s));
                    self.backing = StrBacking::Shared(shared.clone());
                    StrData {
                        backing: StrBacking::Shared(shared),
                    }
                } else {
                    StrData::new(s.clone())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ops() {
        let mut s = StrData::new("abc");
        assert_eq!(s.as_str(), "abc");
        s.concat("def");
        assert_eq!(s.as_str(), "abcdef");
    }

    #[test]
    fn test_static_copy_on_write() {
        let mut s = StrData::from_static("frozen");
        s.concat("!");
        assert_eq!(s.as_str(), "frozen!");
        assert!(matches!(s.backing, StrBacking::Owned(_)));
    }

    #[test]
    fn test_long_dup_shares() {
        let mut s = StrData::new("x".repeat(64));
        let d = s.dup();
        assert!(s.is_shared());
        assert!(d.is_shared());
        assert_eq!(d.as_str(), s.as_str());
    }

    #[test]
    fn test_shared_writer_de_shares() {
        let mut s = StrData::new("y".repeat(64));
        let mut d = s.dup();
        d.concat("z");
        assert!(!d.is_shared());
        assert!(s.is_shared());
        assert_ne!(s.as_str(), d.as_str());
    }

    #[test]
    fn test_short_dup_copies() {
        let mut s = StrData::new("short");
        let d = s.dup();
        assert!(!s.is_shared());
        assert!(!d.is_shared());
        assert_eq!(d.as_str(), "short");
    }
}
