/// Whether an extracted `core.c` needs the second springboard patch.
///
/// Newer kernels mark `__schedule` with an attribute carrying
/// `no-omit-frame-pointer` on the line right above it; older ones do not.
/// Returns `false` as soon as that adjacency is found.
pub fn needs_old_springboard_fix<S: AsRef<str>>(lines: &[S]) -> bool {
    !lines.windows(2).any(|pair| {
        pair[0].as_ref().contains("no-omit-frame-pointer") && pair[1].as_ref().contains("__schedule")
    })
}
