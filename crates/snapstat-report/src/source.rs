//! Where report text comes from.
//!
//! Parsers only see text. [`TextSource`] is the single capability that turns
//! a command into text, either through the keyed cache or straight through
//! the runner, so reports can be exercised against canned fixtures.

use std::time::Duration;

use snapstat_cache::{Clock, KeyedCache};
use snapstat_core::SnapstatResult;
use snapstat_runner::{CommandRunner, CommandSpec};

pub trait TextSource {
    /// Output of `spec`, served from cache when younger than `ttl`.
    fn cached(&self, tag: &str, spec: &CommandSpec, ttl: Duration) -> SnapstatResult<String>;

    /// Output of `spec`, always run fresh.
    fn direct(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String>;
}

impl<R: CommandRunner, C: Clock> TextSource for KeyedCache<R, C> {
    fn cached(&self, tag: &str, spec: &CommandSpec, ttl: Duration) -> SnapstatResult<String> {
        self.get_or_run(tag, spec, ttl)
    }

    fn direct(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String> {
        self.runner().run(spec, timeout)
    }
}

impl<T: TextSource + ?Sized> TextSource for &T {
    fn cached(&self, tag: &str, spec: &CommandSpec, ttl: Duration) -> SnapstatResult<String> {
        (**self).cached(tag, spec, ttl)
    }

    fn direct(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String> {
        (**self).direct(spec, timeout)
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Canned-text source for unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use snapstat_core::SnapstatError;

    use super::*;

    /// Answers by command line (`program arg1 arg2`), records what was asked.
    #[derive(Default)]
    pub(crate) struct FixtureSource {
        answers: HashMap<String, String>,
        missing: Vec<String>,
        pub(crate) tags: Mutex<Vec<(String, Duration)>>,
        pub(crate) commands: Mutex<Vec<CommandSpec>>,
    }

    impl FixtureSource {
        pub(crate) fn answer(mut self, command: &str, text: &str) -> Self {
            self.answers.insert(command.to_string(), text.to_string());
            self
        }

        /// Every command for `program` fails as if it were not installed.
        pub(crate) fn without_program(mut self, program: &str) -> Self {
            self.missing.push(program.to_string());
            self
        }

        fn lookup(&self, spec: &CommandSpec) -> SnapstatResult<String> {
            self.commands.lock().unwrap().push(spec.clone());
            if self.missing.iter().any(|p| p == spec.program()) {
                return Err(SnapstatError::not_found_command(spec.program()));
            }
            match self.answers.get(&spec.to_string()) {
                Some(text) if !text.trim().is_empty() => Ok(text.clone()),
                _ => Err(SnapstatError::empty_output(spec.to_string())),
            }
        }
    }

    impl TextSource for FixtureSource {
        fn cached(&self, tag: &str, spec: &CommandSpec, ttl: Duration) -> SnapstatResult<String> {
            self.tags.lock().unwrap().push((tag.to_string(), ttl));
            self.lookup(spec)
        }

        fn direct(&self, spec: &CommandSpec, _timeout: Duration) -> SnapstatResult<String> {
            self.lookup(spec)
        }
    }
}
