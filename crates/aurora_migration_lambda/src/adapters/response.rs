pub trait ResponseSink {
    /// PUTs `body` to the pre-signed CloudFormation response URL.
    fn put_response(&self, response_url: &str, body: &[u8]) -> Result<(), String>;
}
