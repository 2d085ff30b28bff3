//! Options for a group heap and its traversal passes.
//!
//! Every option has a type, a validator and a default.  Options can be set programmatically
//! with [`Options::set_from_str`], or from environment variables named `SLOTWALK_<OPTION>`
//! (for example `SLOTWALK_WORKLIST_ORDER=Fifo`) with [`Options::read_env_var_settings`].

use crate::util::constants::*;
use crate::worklist::WorkListOrder;

/// Prefix of environment variables that set options.
pub const ENV_VAR_PREFIX: &str = "SLOTWALK_";

/// The default nursery size.
pub const DEFAULT_NURSERY_SIZE: usize = 4 << LOG_BYTES_IN_MBYTE;
/// The default mature space size.
pub const DEFAULT_MATURE_SIZE: usize = 16 << LOG_BYTES_IN_MBYTE;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn valid_space_size(v: &usize) -> bool {
    *v >= MIN_SPACE_BYTES && *v % BYTES_IN_WORD == 0
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty [$validator:expr] = $default:expr),* $(,)?) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Set an option from its name and a string value.  Returns `true` if the value was
            /// parsed and accepted by the validator.  The previous value is kept otherwise.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value to the right type
                    $(stringify!($name) => if let Ok(typed_val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(&typed_val);
                        if is_valid {
                            self.$name = typed_val;
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Keeping {:?}.", s, val, self.$name);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. Keeping {:?}.", s, val, self.$name);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Read options from environment variables prefixed with `SLOTWALK_`.  Variables
            /// that do not name an option are ignored.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_VAR_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// Order in which the work list is drained: `Lifo` (depth-first) or `Fifo` (breadth-first).
    worklist_order:     WorkListOrder [always_valid] = WorkListOrder::Lifo,
    /// Size of the nursery space in bytes.
    nursery_size:       usize         [valid_space_size] = DEFAULT_NURSERY_SIZE,
    /// Size of the mature space in bytes.
    mature_size:        usize         [valid_space_size] = DEFAULT_MATURE_SIZE,
    /// Run the verifier after every marking, scavenging or updating pass.
    verify_after_pass:  bool          [always_valid] = false,
    /// Stop the verifier at the first invariant violation instead of collecting all of them.
    verifier_fail_fast: bool          [always_valid] = false,
    /// Keep a log of every object pushed to the work list.
    record_enqueues:    bool          [always_valid] = false,
    /// Abort the process on a fatal traversal error. If false, panic instead.
    abort_on_fatal:     bool          [always_valid] = true,
}

impl Options {
    /// Default options, overridden by `SLOTWALK_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.read_env_var_settings();
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_env_var() {
        let options = Options::default();
        assert_eq!(options.nursery_size, DEFAULT_NURSERY_SIZE);
        assert_eq!(options.worklist_order, WorkListOrder::Lifo);
        assert!(options.abort_on_fatal);
    }

    #[test]
    fn set_valid_values() {
        let mut options = Options::default();
        assert!(options.set_from_str("worklist_order", "Fifo"));
        assert_eq!(options.worklist_order, WorkListOrder::Fifo);
        assert!(options.set_from_str("nursery_size", "65536"));
        assert_eq!(options.nursery_size, 65536);
        assert!(options.set_from_str("verify_after_pass", "true"));
        assert!(options.verify_after_pass);
    }

    #[test]
    fn reject_invalid_values() {
        let mut options = Options::default();
        // not word aligned
        assert!(!options.set_from_str("mature_size", "65537"));
        assert_eq!(options.mature_size, DEFAULT_MATURE_SIZE);
        // too small
        assert!(!options.set_from_str("nursery_size", "8"));
        // unparsable
        assert!(!options.set_from_str("worklist_order", "Random"));
        assert_eq!(options.worklist_order, WorkListOrder::Lifo);
        // unknown option
        assert!(!options.set_from_str("no_such_option", "1"));
    }

    #[test]
    fn read_from_env_var() {
        std::env::set_var("SLOTWALK_RECORD_ENQUEUES", "true");
        let options = Options::from_env();
        std::env::remove_var("SLOTWALK_RECORD_ENQUEUES");
        assert!(options.record_enqueues);
    }
}
