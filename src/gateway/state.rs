use std::sync::Arc;

use crate::gateway::auth_service::AuthServiceClient;
use crate::gateway::token::TokenValidator;
use crate::rpc_queue::RpcClient;

/// Shared application state
#[derive(Clone)]
pub struct GatewayState {
    /// Client for the OCR work queue, shared by all requests
    pub rpc: Arc<RpcClient>,

    /// Validator for bearer tokens on `/ocr`
    pub tokens: Arc<dyn TokenValidator>,

    /// Forwarder for the `/auth/*` routes
    pub auth_service: AuthServiceClient,
}

impl GatewayState {
    pub fn new(
        rpc: Arc<RpcClient>,
        tokens: impl TokenValidator,
        auth_service: AuthServiceClient,
    ) -> Self {
        Self {
            rpc,
            tokens: Arc::new(tokens),
            auth_service,
        }
    }
}
