use crate::{
    protocol::{DataStreamDecoder, StreamEvent},
    tools::{ToolError, execute_tool, tool_definitions},
    turn::{OutboundMessage, Role},
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::{collections::BTreeMap, pin::Pin};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// A stream of decoded events for one backend response.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend rejected the request: {0}")]
    Api(String),
    #[error("Stream interrupted: {0}")]
    Stream(String),
}

impl From<OpenAIError> for BackendError {
    fn from(e: OpenAIError) -> Self {
        match e {
            OpenAIError::Reqwest(e) => BackendError::Transport(e.to_string()),
            other => BackendError::Api(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

/// A conversational backend that answers the outbound turn log with a stream of events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InterviewBackend: Send + Sync {
    async fn stream_chat(&self, messages: Vec<OutboundMessage>)
    -> Result<EventStream, BackendError>;
}

async fn emit(tx: &mpsc::Sender<Result<StreamEvent, BackendError>>, event: StreamEvent) -> bool {
    if tx.send(Ok(event)).await.is_err() {
        debug!("Event receiver dropped, stopping stream");
        return false;
    }
    true
}

/// Builds the chat history sent upstream: the system prompt followed by the log, with
/// each resolved tool invocation expanded into an assistant tool call and a tool reply.
pub fn to_request_messages(
    system_prompt: &str,
    messages: &[OutboundMessage],
) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    let mut out: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?
            .into(),
    ];
    for msg in messages {
        match msg.role {
            Role::User => out.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
            Role::Assistant if msg.tool_invocations.is_empty() => out.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
            Role::Assistant => {
                let tool_calls = msg
                    .tool_invocations
                    .iter()
                    .map(|inv| ChatCompletionMessageToolCall {
                        id: inv.tool_call_id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: inv.tool_name.clone(),
                            arguments: inv.args.to_string(),
                        },
                    })
                    .collect::<Vec<_>>();
                let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() {
                    assistant.content(msg.content.clone());
                }
                out.push(assistant.tool_calls(tool_calls).build()?.into());
                for inv in &msg.tool_invocations {
                    out.push(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(inv.tool_call_id.clone())
                            .content(inv.result.to_string())
                            .build()?
                            .into(),
                    );
                }
            }
        }
    }
    Ok(out)
}

fn interview_tools() -> Result<Vec<ChatCompletionTool>, OpenAIError> {
    tool_definitions()
        .into_iter()
        .map(|def| {
            ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(def.name)
                        .description(def.description)
                        .parameters(def.parameters)
                        .build()?,
                )
                .build()
        })
        .collect()
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Reassembles tool calls that arrive split across stream chunks, keyed by index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAccumulator {
    /// Folds one fragment in and returns the events it makes observable.
    pub fn push(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Vec<StreamEvent> {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name.push_str(&name);
        }

        let mut events = Vec::new();
        if !call.announced && !call.id.is_empty() && !call.name.is_empty() {
            call.announced = true;
            events.push(StreamEvent::ToolCallStart {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
            });
            if !call.arguments.is_empty() {
                events.push(StreamEvent::ToolCallDelta {
                    call_id: call.id.clone(),
                    args_delta: call.arguments.clone(),
                });
            }
        }
        if let Some(args) = arguments.filter(|a| !a.is_empty()) {
            call.arguments.push_str(&args);
            if call.announced {
                events.push(StreamEvent::ToolCallDelta {
                    call_id: call.id.clone(),
                    args_delta: args,
                });
            }
        }
        events
    }

    /// Completed calls as `(call_id, tool_name, args)`, in index order.
    pub fn finish(self) -> Vec<(String, String, Value)> {
        self.calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                let args = if c.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&c.arguments).unwrap_or_else(|e| {
                        warn!(tool = %c.name, error = %e, "Tool arguments are not valid JSON");
                        json!({})
                    })
                };
                (c.id, c.name, args)
            })
            .collect()
    }
}

/// Runs a tool locally and renders its outcome as the result frame value.
fn tool_result(tool_name: &str, args: &Value) -> Value {
    let outcome = execute_tool(tool_name, args).and_then(|payload| {
        let tool = payload.kind();
        payload
            .to_result_value()
            .map_err(|source| ToolError::InvalidArguments { tool, source })
    });
    match outcome {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %tool_name, error = %e, "Tool execution failed");
            json!({ "error": e.to_string() })
        }
    }
}

/// An implementation of `InterviewBackend` for any OpenAI-compatible API.
///
/// Tools are executed in-process as soon as the model finishes calling them; the model
/// sees their results on the next request, as part of the outbound log.
pub struct OpenAICompatibleBackend {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl OpenAICompatibleBackend {
    /// Creates a new backend for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The chat model identifier (e.g., "gpt-4o").
    /// * `temperature` - Sampling temperature for every request.
    /// * `system_prompt` - Prepended to every outbound log.
    pub fn new(
        config: OpenAIConfig,
        model: String,
        temperature: f32,
        system_prompt: String,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            temperature,
            system_prompt,
        }
    }

    fn build_request(
        &self,
        messages: &[OutboundMessage],
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(to_request_messages(&self.system_prompt, messages)?)
            .tools(interview_tools()?)
            .tool_choice("auto")
            .stream(true)
            .build()
    }
}

#[async_trait]
impl InterviewBackend for OpenAICompatibleBackend {
    async fn stream_chat(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<EventStream, BackendError> {
        let request = self.build_request(&messages)?;
        let mut upstream = self.client.chat().create_stream(request).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut calls = ToolCallAccumulator::default();
            let mut finish_reason = None;

            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Event receiver dropped, closing upstream stream");
                        return;
                    }
                    chunk = upstream.next() => chunk,
                };
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(BackendError::Stream(e.to_string()))).await;
                        return;
                    }
                    None => break,
                };
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        if !emit(&tx, StreamEvent::TextDelta(content)).await {
                            return;
                        }
                    }
                    for fragment in choice.delta.tool_calls.unwrap_or_default() {
                        let (name, arguments) = fragment
                            .function
                            .map(|f| (f.name, f.arguments))
                            .unwrap_or_default();
                        for event in calls.push(fragment.index, fragment.id, name, arguments) {
                            if !emit(&tx, event).await {
                                return;
                            }
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        finish_reason = serde_json::to_value(reason)
                            .ok()
                            .and_then(|v| v.as_str().map(str::to_owned));
                    }
                }
            }

            for (call_id, tool_name, args) in calls.finish() {
                let result = tool_result(&tool_name, &args);
                let call = StreamEvent::ToolCall {
                    call_id: call_id.clone(),
                    tool_name,
                    args,
                };
                if !emit(&tx, call).await
                    || !emit(&tx, StreamEvent::ToolResult { call_id, result }).await
                {
                    return;
                }
            }
            emit(&tx, StreamEvent::Finish {
                reason: finish_reason,
            })
            .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// An `InterviewBackend` that posts the log to a remote chat endpoint speaking the
/// data-stream protocol.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl InterviewBackend for HttpBackend {
    async fn stream_chat(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<EventStream, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "messages": messages }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{status}: {body}")));
        }

        let mut body = Box::pin(response.bytes_stream());
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut decoder = DataStreamDecoder::new();
            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Event receiver dropped, closing response body");
                        return;
                    }
                    chunk = body.next() => chunk,
                };
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(BackendError::Transport(e.to_string()))).await;
                        return;
                    }
                    None => break,
                };
                for event in decoder.push(&chunk) {
                    if !emit(&tx, event).await {
                        return;
                    }
                }
            }
            for event in decoder.finish() {
                if !emit(&tx, event).await {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
