//! AWS Bedrock provider using the unified Converse API.
//!
//! All model families go through the Converse streaming surface; the
//! interesting work is message translation ([`input`]) and the stream
//! reordering state machine ([`output`]).

mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::{Credentials, provider::SharedCredentialsProvider};
use aws_sdk_bedrockruntime::{Client as BedrockRuntimeClient, error::ProvideErrorMetadata};
use aws_smithy_runtime_api::{
    box_error::BoxError,
    client::{
        interceptors::{Intercept, context::BeforeTransmitInterceptorContextMut},
        result::SdkError,
        runtime_components::RuntimeComponents,
    },
};
use aws_smithy_types::config_bag::ConfigBag;
use futures::stream;
use secrecy::{ExposeSecret, SecretString};

use config::ModelConfig;

use crate::{
    catalog::ModelCatalog,
    env::{EnvProvider, keys},
    error::LlmError,
    messages::{ChatCompletionStream, Message, ToolDefinition},
    provider::{BaseConfig, Provider, RequestOptions, ensure_messages},
};

use self::{input::ConverseRequest, output::ConverseStreamState};

pub struct BedrockProvider {
    client: BedrockRuntimeClient,
    config: ModelConfig,
    env: Arc<dyn EnvProvider>,
    catalog: Arc<ModelCatalog>,
    caching_supported: bool,
}

impl BedrockProvider {
    /// Create a new Bedrock Converse provider instance.
    ///
    /// Loads AWS configuration (env chain, profile, assumed role), resolves
    /// the optional bearer token, and asks the model catalog whether prompt
    /// caching applies to the configured model.
    pub async fn new(
        config: ModelConfig,
        env: Arc<dyn EnvProvider>,
        catalog: Arc<ModelCatalog>,
    ) -> crate::Result<Self> {
        let bearer = resolve_bearer_token(&config, env.as_ref()).await;
        let sdk_config = load_aws_config(&config, env.as_ref()).await?;

        let client = build_runtime_client(&sdk_config, bearer);
        let catalog_client = aws_sdk_bedrock::Client::new(&sdk_config);

        let caching_supported = catalog.caching_supported(&catalog_client, &config.model).await;

        Ok(Self {
            client,
            config,
            env,
            catalog,
            caching_supported,
        })
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    async fn create_chat_completion_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: RequestOptions,
    ) -> crate::Result<ChatCompletionStream> {
        ensure_messages(&messages)?;

        log::debug!("Processing Bedrock streaming for model: {}", self.config.model);

        let request =
            ConverseRequest::build(&self.config, self.caching_supported, messages, tools, options)?;

        let stream_output = self
            .client
            .converse_stream()
            .model_id(self.config.model.clone())
            .set_system(request.system)
            .set_messages(Some(request.messages))
            .set_inference_config(request.inference_config)
            .set_tool_config(request.tool_config)
            .set_additional_model_request_fields(request.additional_fields)
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to invoke Converse stream API: {e:?}");
                handle_bedrock_error(e)
            })?;

        let state = ConverseStreamState::new(stream_output.stream);

        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            state.recv().await.map(|event| (event, state))
        })))
    }

    fn id(&self) -> String {
        format!("bedrock/{}", self.config.model)
    }

    fn base_config(&self) -> BaseConfig {
        BaseConfig {
            config: self.config.clone(),
            env: self.env.clone(),
        }
    }

    async fn clone_with_config(&self, config: ModelConfig) -> crate::Result<Arc<dyn Provider>> {
        Ok(Arc::new(
            Self::new(config, self.env.clone(), self.catalog.clone()).await?,
        ))
    }
}

async fn resolve_bearer_token(config: &ModelConfig, env: &dyn EnvProvider) -> Option<SecretString> {
    if let Some(token) = config.api_key() {
        return Some(token);
    }

    env.get(keys::AWS_BEARER_TOKEN_BEDROCK)
        .await
        .map(SecretString::from)
}

/// Load AWS SDK configuration from the environment provider and config.
async fn load_aws_config(
    config: &ModelConfig,
    env: &dyn EnvProvider,
) -> crate::Result<aws_config::SdkConfig> {
    let region = match config.region() {
        Some(region) => Some(region.to_string()),
        None => match env.get(keys::AWS_REGION).await {
            Some(region) => Some(region),
            None => env.get(keys::AWS_DEFAULT_REGION).await,
        },
    };

    let mut loader = aws_config::from_env();

    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }

    if let Some(profile) = config.profile() {
        loader = loader.profile_name(profile);
    }

    let mut sdk_config = loader.load().await;

    if let Some(role_arn) = config.role_arn() {
        let mut builder =
            aws_config::sts::AssumeRoleProvider::builder(role_arn).configure(&sdk_config);

        if let Some(session_name) = config.role_session_name() {
            builder = builder.session_name(session_name);
        }

        if let Some(external_id) = config.external_id() {
            builder = builder.external_id(external_id);
        }

        let provider = builder.build().await;

        sdk_config = sdk_config
            .into_builder()
            .credentials_provider(SharedCredentialsProvider::new(provider))
            .build();
    }

    let endpoint = config
        .endpoint_url()
        .map(str::to_owned)
        .or_else(|| config.base_url.clone());

    if let Some(endpoint) = endpoint {
        log::debug!("Using custom Bedrock endpoint: {endpoint}");
        sdk_config = sdk_config.into_builder().endpoint_url(endpoint).build();
    }

    Ok(sdk_config)
}

fn build_runtime_client(
    sdk_config: &aws_config::SdkConfig,
    bearer: Option<SecretString>,
) -> BedrockRuntimeClient {
    let Some(token) = bearer else {
        return BedrockRuntimeClient::new(sdk_config);
    };

    // Bearer auth bypasses SigV4: sign with placeholder anonymous
    // credentials, then overwrite the Authorization header after signing.
    let conf = aws_sdk_bedrockruntime::config::Builder::from(sdk_config)
        .credentials_provider(Credentials::new(
            "anonymous",
            "anonymous",
            None,
            None,
            "bedrock_bearer_token",
        ))
        .interceptor(BearerTokenInterceptor { token })
        .build();

    BedrockRuntimeClient::from_conf(conf)
}

#[derive(Debug)]
struct BearerTokenInterceptor {
    token: SecretString,
}

impl Intercept for BearerTokenInterceptor {
    fn name(&self) -> &'static str {
        "BearerTokenInterceptor"
    }

    fn modify_before_transmit(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let value = format!("Bearer {}", self.token.expose_secret());
        context.request_mut().headers_mut().try_insert("authorization", value)?;
        Ok(())
    }
}

/// Handle Bedrock SDK errors and convert to LlmError.
fn handle_bedrock_error<E, R>(error: SdkError<E, R>) -> LlmError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::ServiceError(service_error) => {
            let err = service_error.err();
            let message = err.message().unwrap_or("Unknown error").to_string();

            match err.code() {
                Some("AccessDeniedException") | Some("UnauthorizedException") => {
                    LlmError::AuthenticationFailed(message)
                }
                Some("ResourceNotFoundException") => LlmError::ModelNotFound(message),
                Some("ThrottlingException") => LlmError::RateLimitExceeded { message },
                Some("ValidationException") => LlmError::InvalidRequest(message),
                Some("ModelTimeoutException") => LlmError::ProviderApiError { status: 504, message },
                Some("ServiceUnavailableException") => {
                    LlmError::ProviderApiError { status: 503, message }
                }
                Some("InternalServerException") => LlmError::Internal(Some(message)),
                _ => LlmError::ProviderApiError { status: 500, message },
            }
        }
        _ => LlmError::ConnectionError(format!("{error:?}")),
    }
}
