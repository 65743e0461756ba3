use std::{error::Error, sync::Arc};

use rama::error::BoxError;
use tonic::Status;

/// Turn a scenario error into the status reported to the driver.
///
/// A [`Status`] anywhere in the error chain is passed through as is;
/// everything else becomes `internal`, carrying the error as its source.
pub(super) fn into_status(err: BoxError) -> Status {
    let passed_through = std::iter::successors(Some(&*err as &(dyn Error + 'static)), |err| err.source())
        .find_map(|err| err.downcast_ref::<Status>())
        .cloned();
    if let Some(status) = passed_through {
        return status;
    }

    let mut status = Status::internal(err.to_string());
    status.set_source(Arc::from(err));
    status
}

#[cfg(test)]
mod tests {
    use rama::error::OpaqueError;
    use tonic::Code;

    use super::*;

    #[test]
    fn test_status_passes_through() {
        let status = into_status(Status::unavailable("gone").into());
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "gone");
    }

    #[test]
    fn test_other_errors_become_internal() {
        let err: BoxError = OpaqueError::from_display("bind failed").into();
        let status = into_status(err);
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("bind failed"));
        assert!(status.source().is_some());
    }
}
