use std::time::Duration;

/// A structure to manage the flashing procedure progress reporting.
///
/// This struct stores a handler closure which will be called every time an
/// event happens during the flashing process. Such an event can be the start
/// or finish of a phase or a progress report.
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent)>,
}

impl FlashProgress {
    /// Create a new `FlashProgress` structure with a given `handler` to be
    /// called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// A progress reporter that swallows all events.
    pub fn empty() -> Self {
        Self::new(|_| {})
    }

    /// Emit a flashing progress event.
    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    /// Signalize that the flash layout was planned and the algorithm is
    /// about to be loaded.
    pub(super) fn initialized(&self, chip_erase: bool, sectors: usize, pages: usize) {
        self.emit(ProgressEvent::Initialized {
            chip_erase,
            sectors,
            pages,
        });
    }

    /// Signalize that the filling procedure started.
    pub(super) fn started_filling(&self) {
        self.emit(ProgressEvent::StartedFilling);
    }

    /// Signalize that the page filling procedure has made progress.
    pub(super) fn page_filled(&self, size: u64, time: Duration) {
        self.emit(ProgressEvent::PageFilled { size, time });
    }

    /// Signalize that the filling procedure failed.
    pub(super) fn failed_filling(&self) {
        self.emit(ProgressEvent::FailedFilling);
    }

    /// Signalize that the filling procedure completed successfully.
    pub(super) fn finished_filling(&self) {
        self.emit(ProgressEvent::FinishedFilling);
    }

    /// Signalize that the erasing procedure started.
    pub(super) fn started_erasing(&self) {
        self.emit(ProgressEvent::StartedErasing);
    }

    /// Signalize that the sector erasing procedure has made progress.
    pub(super) fn sector_erased(&self, size: u64, time: Duration) {
        self.emit(ProgressEvent::SectorErased { size, time });
    }

    /// Signalize that the erasing procedure failed.
    pub(super) fn failed_erasing(&self) {
        self.emit(ProgressEvent::FailedErasing);
    }

    /// Signalize that the erasing procedure completed successfully.
    pub(super) fn finished_erasing(&self) {
        self.emit(ProgressEvent::FinishedErasing);
    }

    /// Signalize that the programming procedure started.
    pub(super) fn started_programming(&self) {
        self.emit(ProgressEvent::StartedProgramming);
    }

    /// Signalize that the page programming procedure has made progress.
    pub(super) fn page_programmed(&self, size: u32, time: Duration) {
        self.emit(ProgressEvent::PageProgrammed { size, time });
    }

    /// Signalize that the programming procedure failed.
    pub(super) fn failed_programming(&self) {
        self.emit(ProgressEvent::FailedProgramming);
    }

    /// Signalize that the programming procedure completed successfully.
    pub(super) fn finished_programming(&self) {
        self.emit(ProgressEvent::FinishedProgramming);
    }

    /// Signalize that the verifying procedure started.
    pub(super) fn started_verifying(&self) {
        self.emit(ProgressEvent::StartedVerifying);
    }

    /// Signalize that the verifying procedure failed.
    pub(super) fn failed_verifying(&self) {
        self.emit(ProgressEvent::FailedVerifying);
    }

    /// Signalize that the verifying procedure completed successfully.
    pub(super) fn finished_verifying(&self) {
        self.emit(ProgressEvent::FinishedVerifying);
    }
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::empty()
    }
}

/// Possible events during the flashing process.
///
/// If flashing works without problems, the events arrive in the following
/// order:
///
/// * `Initialized`
/// * `StartedFilling`, `PageFilled` for every restored fill, `FinishedFilling`
/// * `StartedErasing`, `SectorErased` for every sector, `FinishedErasing`
/// * `StartedProgramming`, `PageProgrammed` for every page, `FinishedProgramming`
/// * `StartedVerifying`, `FinishedVerifying` when verification was requested
///
/// If an error occurs in any stage, the matching `Failed*` event is emitted
/// and no further events follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The flash layout has been planned and the procedure was initialized.
    Initialized {
        /// Whether a full chip erase will be used instead of sector erases.
        chip_erase: bool,
        /// The number of sectors that will be erased.
        sectors: usize,
        /// The number of pages that will be programmed.
        pages: usize,
    },
    /// Filling of pages with old flash contents has started.
    StartedFilling,
    /// A page fill has been read back successfully.
    PageFilled {
        /// The size of the fill in bytes.
        size: u64,
        /// The time it took to read this fill back.
        time: Duration,
    },
    /// Filling of the pages has failed.
    FailedFilling,
    /// Filling of the pages has finished successfully.
    FinishedFilling,
    /// Erasing of flash has started.
    StartedErasing,
    /// A sector has been erased successfully.
    SectorErased {
        /// The size of the sector in bytes.
        size: u64,
        /// The time it took to erase this sector.
        time: Duration,
    },
    /// Erasing of the flash has failed.
    FailedErasing,
    /// Erasing of the flash has finished successfully.
    FinishedErasing,
    /// Programming of the flash has started.
    StartedProgramming,
    /// A flash page has been programmed successfully.
    PageProgrammed {
        /// The size of this page in bytes.
        size: u32,
        /// The time it took to program this page.
        time: Duration,
    },
    /// Programming of the flash failed.
    FailedProgramming,
    /// Programming of the flash has finished successfully.
    FinishedProgramming,
    /// Verification of the flash has started.
    StartedVerifying,
    /// Verification of the flash failed.
    FailedVerifying,
    /// Verification of the flash has finished successfully.
    FinishedVerifying,
}
