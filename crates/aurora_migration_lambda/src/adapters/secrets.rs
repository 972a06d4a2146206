pub trait SecretSource {
    /// Returns the `SecretString` of the secret with the given name or ARN.
    fn secret_string(&self, secret_id: &str) -> Result<String, String>;
}
