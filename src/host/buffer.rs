/// Widens a host block for a hosted plugin that wants more channels than the
/// host provides.
///
/// The wider buffer starts as a copy of the host channels with the extra
/// channels zeroed, and only the host's channel count is copied back after
/// processing. Storage is sized in [`ChannelAdapter::prepare`] so the audio
/// thread only copies.
#[derive(Debug, Default)]
pub struct ChannelAdapter {
    scratch: Vec<Vec<f32>>,
    /// Slice table handed to the plugin. Always empty between blocks; only
    /// its allocation is kept.
    table: Vec<&'static mut [f32]>,
}

/// Reuses an empty table's allocation for a shorter lifetime.
fn borrow_table<'a>(mut table: Vec<&'static mut [f32]>) -> Vec<&'a mut [f32]> {
    table.clear();
    // SAFETY: the vector is empty, so no reference outlives its referent;
    // the types differ only in lifetime.
    unsafe { std::mem::transmute(table) }
}

fn return_table(mut table: Vec<&mut [f32]>) -> Vec<&'static mut [f32]> {
    table.clear();
    // SAFETY: as in `borrow_table`.
    unsafe { std::mem::transmute(table) }
}

impl ChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the scratch storage. Must not be called from the audio thread.
    pub fn prepare(&mut self, channels: usize, max_block_size: usize) {
        self.scratch.resize_with(channels, Vec::new);
        for channel in &mut self.scratch {
            channel.clear();
            channel.resize(max_block_size, 0.0);
        }
        self.table.clear();
        self.table.reserve(channels);
    }

    pub fn capacity(&self) -> (usize, usize) {
        (
            self.scratch.len(),
            self.scratch.first().map_or(0, Vec::len),
        )
    }

    /// Calls `process` with at least `required_channels` channels of
    /// `num_samples` samples each. Returns `false`, leaving the block
    /// untouched, when the block exceeds what [`prepare`](Self::prepare)
    /// sized for.
    pub fn run<F>(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        required_channels: usize,
        process: F,
    ) -> bool
    where
        F: FnOnce(&mut [&mut [f32]]),
    {
        if required_channels <= channels.len() {
            process(channels);
            return true;
        }

        let (have_channels, have_samples) = self.capacity();
        if have_channels < required_channels || have_samples < num_samples {
            log::warn!(
                "Block of {}x{} exceeds the prepared {}x{}, skipping",
                required_channels,
                num_samples,
                have_channels,
                have_samples
            );
            return false;
        }

        let host_channels = channels.len();
        for (dst, src) in self.scratch.iter_mut().zip(channels.iter()) {
            let n = num_samples.min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
            dst[n..num_samples].fill(0.0);
        }
        for dst in &mut self.scratch[host_channels..required_channels] {
            dst[..num_samples].fill(0.0);
        }

        let mut wide = borrow_table(std::mem::take(&mut self.table));
        wide.extend(
            self.scratch[..required_channels]
                .iter_mut()
                .map(|c| &mut c[..num_samples]),
        );
        process(&mut wide);

        for (dst, src) in channels.iter_mut().zip(wide.iter()) {
            let n = num_samples.min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
        self.table = return_table(wide);
        true
    }
}
