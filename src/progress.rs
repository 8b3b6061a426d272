/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Initialize some progress report
    fn init(&mut self, total: usize, message: &'static str);
    /// Update some progress report
    fn update(&mut self, current: usize);
    /// Finish some progress report
    fn finish(&mut self);
}

/// Reborrows an `Option<&mut dyn ProgressCallbacks>` so it can be passed to
/// multiple calls in sequence. A plain `.as_deref_mut()` does not reborrow
/// here because `&mut dyn Trait` is invariant, so the borrow checker ties the
/// original binding's lifetime to the first use; an explicit function with a
/// named lifetime sidesteps that.
pub fn reborrow_progress<'a>(
    progress: &'a mut Option<&mut dyn ProgressCallbacks>,
) -> Option<&'a mut dyn ProgressCallbacks> {
    match progress {
        Some(p) => Some(&mut **p),
        None => None,
    }
}
