//! Classification of AWS SDK failures into the crate's error kinds.

use std::fmt;

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::resource::ClientError;

enum FailureKind {
    /// Request never produced a service response.
    Transport,
    /// The client could not be assembled (typically credential resolution).
    Construction,
    /// The service answered with an error code.
    Service,
}

/// Maps an SDK error into a [`ClientError`], keyed off the service error
/// code where one exists. `context` names the operation for the message.
pub(crate) fn classify_sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    let code = err.code().map(str::to_owned);
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => FailureKind::Transport,
        SdkError::ConstructionFailure(_) => FailureKind::Construction,
        _ => FailureKind::Service,
    };
    let detail = DisplayErrorContext(err).to_string();

    match kind {
        FailureKind::Transport => {
            if mentions_credentials(&detail) {
                ClientError::Auth(format!("{context}: {detail}"))
            } else {
                ClientError::Connectivity(format!("{context}: {detail}"))
            }
        }
        FailureKind::Construction => ClientError::Auth(format!("{context}: {detail}")),
        FailureKind::Service => classify_service_code(context, code.as_deref(), &detail),
    }
}

fn classify_service_code(context: &str, code: Option<&str>, detail: &str) -> ClientError {
    let Some(code) = code else {
        return ClientError::Provider(format!("{context}: {detail}"));
    };

    if AUTH_CODES.iter().any(|known| code.contains(known)) {
        return ClientError::Auth(format!("{context}: {detail}"));
    }
    if code.contains("NotFound") || code.contains("Malformed") {
        return ClientError::Lookup(format!("{context}: {detail}"));
    }
    if STATE_CODES.iter().any(|known| code.contains(known)) {
        return ClientError::Transition(format!("{context}: {detail}"));
    }
    ClientError::Provider(format!("{context}: {detail}"))
}

const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "AccessDenied",
    "OptInRequired",
    "PendingVerification",
];

const STATE_CODES: &[&str] = &[
    "IncorrectInstanceState",
    "IncorrectState",
    "InvalidState",
    "InvalidInstance",
    "OperationNotPermitted",
    "ResourceCountExceeded",
];

fn mentions_credentials(detail: &str) -> bool {
    let lowered = detail.to_ascii_lowercase();
    lowered.contains("credential") || lowered.contains("no providers in chain")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::resource::ClientError;

    use super::classify_service_code;

    #[rstest]
    #[case("AuthFailure", "auth")]
    #[case("UnauthorizedOperation", "auth")]
    #[case("InvalidInstanceID.NotFound", "lookup")]
    #[case("LoadBalancerNotFound", "lookup")]
    #[case("IncorrectInstanceState", "transition")]
    #[case("SomethingElseEntirely", "provider")]
    fn service_codes_map_to_error_kinds(#[case] code: &str, #[case] expected: &str) {
        let err = classify_service_code("op", Some(code), "detail");
        let actual = match err {
            ClientError::Auth(_) => "auth",
            ClientError::Lookup(_) => "lookup",
            ClientError::Connectivity(_) => "connectivity",
            ClientError::Transition(_) => "transition",
            ClientError::Provider(_) => "provider",
        };
        assert_eq!(actual, expected, "code {code}");
    }

    #[test]
    fn missing_code_is_a_provider_error() {
        let err = classify_service_code("op", None, "detail");
        assert!(matches!(err, ClientError::Provider(_)));
    }
}
