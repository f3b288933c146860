use thiserror::Error;

/// Library error type for photobooth operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Another capture session is already live; the trigger is rejected, not queued.
    #[error("a capture session is already in progress")]
    Busy,

    /// The camera could not be opened or did not deliver a frame in time.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The printer could not be opened or the USB transfer failed.
    #[error("printer unavailable: {0}")]
    PrinterUnavailable(String),

    /// The printer reported an offline/out-of-paper condition mid-job.
    #[error("printer jammed: {0}")]
    PrinterJammed(String),

    /// Gallery operation on an unknown filename.
    #[error("photo not found: {0}")]
    NotFound(String),

    /// Disk write failed while persisting a photo or its metadata.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, user-safe description surfaced through `/api/status`.
    ///
    /// Hardware errors carry device-level detail in their `Display` form for
    /// the logs; pollers only ever see these fixed strings.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Busy => "Photo already in progress!",
            Error::DeviceUnavailable(_) => "Camera is not responding",
            Error::PrinterUnavailable(_) => "Printer is not responding",
            Error::PrinterJammed(_) => "Printer jam - check the paper roll",
            Error::NotFound(_) => "Photo not found",
            Error::StorageFailure(_) | Error::Io(_) => "Could not save the photo",
        }
    }
}
