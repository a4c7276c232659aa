//! Header names and problem type URIs.

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const NO_CACHE: &str = "private, no-cache, no-store, must-revalidate";

pub(crate) const PROBLEM_INVALID: &str = "https://prism.dev/problems/invalid-request";
pub(crate) const PROBLEM_SIGNATURE: &str = "https://prism.dev/problems/signature-mismatch";
pub(crate) const PROBLEM_FORBIDDEN: &str = "https://prism.dev/problems/forbidden";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://prism.dev/problems/not-found";
pub(crate) const PROBLEM_TIMEOUT: &str = "https://prism.dev/problems/timeout";
pub(crate) const PROBLEM_UNSUPPORTED: &str = "https://prism.dev/problems/unsupported";
pub(crate) const PROBLEM_UPSTREAM: &str = "https://prism.dev/problems/upstream";
pub(crate) const PROBLEM_INTERNAL: &str = "https://prism.dev/problems/internal";
