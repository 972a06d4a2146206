/// Result of a synchronous invocation of the user handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub payload: Vec<u8>,
    /// Set when the handler itself failed (`X-Amz-Function-Error`).
    pub function_error: Option<String>,
}

pub trait OnEventInvoker {
    fn invoke_on_event(&self, payload: &[u8]) -> Result<InvokeOutcome, String>;
}
