use indicatif::ProgressStyle;

/// "N of M" indicator drawn with `indicatif` and mirrored to `tracing`.
///
/// Owned by the controlling thread only.
pub struct ProgressBar {
    description: String,
    bar: indicatif::ProgressBar,
}

impl ProgressBar {
    pub fn new(total: usize, description: impl Into<String>) -> Self {
        let description = description.into();
        let bar = indicatif::ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template("{msg}: {pos} of {len} {wide_bar}") {
            bar.set_style(style);
        }
        bar.set_message(description.clone());

        tracing::info!("{description}: 0 of {total}");
        Self { description, bar }
    }

    pub fn update(&mut self) {
        self.update_by(1);
    }

    pub fn update_by(&mut self, n: usize) {
        let remaining = self.total() - self.done();
        self.bar.inc(n.min(remaining) as u64);
        tracing::debug!("{}: {} of {}", self.description, self.done(), self.total());
    }

    pub fn done(&self) -> usize {
        self.bar.position() as usize
    }

    pub fn total(&self) -> usize {
        self.bar.length().unwrap_or(0) as usize
    }

    pub fn end(self) {
        self.bar.finish();
        tracing::info!("{}: {} of {} done", self.description, self.done(), self.total());
    }
}
