//! Plugin-side protocol helper
//!
//! Turns a `Plugin` implementation into an executable that speaks the
//! subprocess protocol: verb in argv, `PluginRequest` JSON on stdin,
//! `PluginResponse` JSON as the last stdout line, exit 0 on success.

use super::capability::{Plugin, PluginContext};
use super::protocol::{PluginRequest, PluginResponse, Verb};
use super::{PluginError, PluginResult};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Answer one request with a plugin
pub async fn handle(
    plugin: &dyn Plugin,
    request: &PluginRequest,
    cancel: &CancellationToken,
) -> PluginResponse {
    let outcome = match request.verb {
        Verb::Init => {
            let context = PluginContext {
                plugin_dir: std::env::current_dir().unwrap_or_default(),
                config: request.config.clone(),
            };
            plugin
                .initialize(cancel, &context)
                .await
                .map(|_| PluginResponse::ok(format!("{} initialized", plugin.name())))
        }
        Verb::Validate => plugin
            .validate(cancel)
            .await
            .map(|_| PluginResponse::ok(format!("{} is valid", plugin.name()))),
        Verb::Cleanup => plugin
            .cleanup(cancel)
            .await
            .map(|_| PluginResponse::ok(format!("{} cleaned up", plugin.name()))),
        Verb::Describe => {
            let mut response = PluginResponse::ok(plugin.description());
            response.operations = Some(plugin.supported_operations());
            Ok(response)
        }
        Verb::Execute => execute(plugin, request, cancel).await,
    };

    match outcome {
        Ok(response) => response,
        Err(e) => PluginResponse::failed(
            format!("Plugin '{}' failed to {}", plugin.name(), request.verb),
            e.to_string(),
        ),
    }
}

async fn execute(
    plugin: &dyn Plugin,
    request: &PluginRequest,
    cancel: &CancellationToken,
) -> PluginResult<PluginResponse> {
    let operation = request.operation.ok_or_else(|| {
        PluginError::Validation("execute request carries no operation".to_string())
    })?;
    let result = plugin.execute(cancel, operation, &request.params).await?;
    Ok(PluginResponse {
        success: result.success,
        message: result.message,
        data: result.data,
        error: result.error,
        operations: None,
    })
}

/// Run a plugin executable's main loop
///
/// `build` receives the decoded request so the plugin can be constructed from
/// the configuration it carries.
pub async fn serve<F>(build: F) -> ExitCode
where
    F: FnOnce(&PluginRequest) -> PluginResult<Arc<dyn Plugin>>,
{
    let verb = match std::env::args().nth(1).map(|arg| arg.parse::<Verb>()) {
        Some(Ok(verb)) => verb,
        Some(Err(e)) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
        None => {
            eprintln!("usage: <plugin> init|validate|cleanup|execute|describe");
            return ExitCode::from(2);
        }
    };

    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        tracing::warn!("Failed to read request from stdin: {}", e);
    }

    let mut request = if input.trim().is_empty() {
        PluginRequest::new(verb, "", "")
    } else {
        match serde_json::from_str::<PluginRequest>(&input) {
            Ok(request) => request,
            Err(e) => {
                println!(
                    "{}",
                    PluginResponse::failed("invalid request", e.to_string()).to_line()
                );
                return ExitCode::FAILURE;
            }
        }
    };
    // argv is authoritative for the verb
    request.verb = verb;

    let plugin = match build(&request) {
        Ok(plugin) => plugin,
        Err(e) => {
            println!(
                "{}",
                PluginResponse::failed("plugin construction failed", e.to_string()).to_line()
            );
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let response = handle(plugin.as_ref(), &request, &cancel).await;
    println!("{}", response.to_line());

    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
