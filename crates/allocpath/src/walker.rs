//! Stack-walk abstraction behind the allocation-path manager.
//!
//! The manager only walks when a thread's accumulated path is ambiguous;
//! the steady state never touches this module. Keeping the walk behind a
//! trait lets tests substitute a scripted walker and count invocations.

use backtrace::BytesOrWideString;

/// Source of qualified frame names for the current thread's call stack.
pub trait CallStackSource: Send + Sync {
    /// Collects up to `max_frames` frame names, innermost first, after
    /// discarding the first `skip_frames` resolvable frames. Frames
    /// without symbol information are passed over, so a shallow result
    /// means the walk reached the stack root.
    fn collect_frames(&self, skip_frames: usize, max_frames: usize) -> Vec<String>;
}

/// Default walker backed by the `backtrace` crate.
pub struct BacktraceWalker;

impl CallStackSource for BacktraceWalker {
    fn collect_frames(&self, skip_frames: usize, max_frames: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(max_frames);
        let mut to_skip = skip_frames;

        backtrace::trace(|frame| {
            let mut resolved: Option<String> = None;
            backtrace::resolve_frame(frame, |symbol| {
                if resolved.is_none() {
                    if let Some(name) = symbol.name() {
                        resolved = Some(name.to_string());
                    } else if let Some(filename) = symbol.filename_raw() {
                        // Symbol table miss; fall back to file:line.
                        let line = symbol.lineno().unwrap_or(0);
                        resolved = Some(match filename {
                            BytesOrWideString::Bytes(bytes) => {
                                format!("{}:{line}", String::from_utf8_lossy(bytes))
                            }
                            BytesOrWideString::Wide(_) => format!("<wide path>:{line}"),
                        });
                    }
                }
            });

            if let Some(name) = resolved {
                if to_skip > 0 {
                    to_skip -= 1;
                } else {
                    names.push(name);
                }
            }

            names.len() < max_frames
        });

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_at_most_max_frames() {
        let frames = BacktraceWalker.collect_frames(0, 3);
        assert!(frames.len() <= 3);
    }

    #[test]
    fn skip_drops_the_innermost_frames() {
        let full = BacktraceWalker.collect_frames(0, 4);
        if full.len() == 4 {
            let skipped = BacktraceWalker.collect_frames(1, 3);
            assert_eq!(skipped.first(), full.get(1));
        }
    }
}
