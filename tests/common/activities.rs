use async_trait::async_trait;
use filament::activity::{Activity, ActivityContext, ActivityError, Outcome};
use serde_json::{Value, json};

/// Appends `entry` to the shared `log` array variable.
///
/// The root input must seed `log` (see
/// [`input_with_log`](super::fixtures::input_with_log)) so that branch
/// writes resolve to the shared root binding instead of defining a
/// branch-local one.
pub fn push_log(ctx: &mut ActivityContext<'_>, entry: &str) {
    let mut log = ctx.get("log").cloned().unwrap_or_else(|| json!([]));
    if let Some(entries) = log.as_array_mut() {
        entries.push(json!(entry));
    }
    ctx.set("log", log);
}

/// Reads the `log` array back out of a finished instance's variables.
pub fn log_entries(variables: &filament::variables::VariableMap) -> Vec<String> {
    variables
        .get("log")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Completes immediately, appending its label to the log.
#[derive(Debug, Clone)]
pub struct Append(pub &'static str);

#[async_trait]
impl Activity for Append {
    async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        push_log(ctx, self.0);
        Ok(Outcome::Completed)
    }

    async fn on_cancel(&self, ctx: &mut ActivityContext<'_>) {
        push_log(ctx, &format!("canceled:{}", self.0));
    }
}

/// Does nothing.
#[derive(Debug, Clone)]
pub struct Noop;

#[async_trait]
impl Activity for Noop {
    async fn execute(&self, _ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        Ok(Outcome::Completed)
    }
}

/// Suspends on a fixed bookmark name; on resume, stores the delivered
/// payload under that name and completes.
#[derive(Debug, Clone)]
pub struct WaitFor(pub &'static str);

#[async_trait]
impl Activity for WaitFor {
    async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        push_log(ctx, &format!("waiting:{}", self.0));
        Ok(Outcome::suspend(self.0))
    }

    async fn resume(
        &self,
        ctx: &mut ActivityContext<'_>,
        value: Value,
    ) -> Result<Outcome, ActivityError> {
        ctx.set(self.0, value);
        push_log(ctx, &format!("resumed:{}", self.0));
        Ok(Outcome::Completed)
    }

    async fn on_cancel(&self, ctx: &mut ActivityContext<'_>) {
        push_log(ctx, &format!("canceled:{}", self.0));
    }
}

/// Fails with a fixed message.
#[derive(Debug, Clone)]
pub struct Explode(pub &'static str);

#[async_trait]
impl Activity for Explode {
    async fn execute(&self, _ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        Err(ActivityError::failed(self.0))
    }
}

/// Writes a fixed variable and completes.
#[derive(Debug, Clone)]
pub struct SetVar(pub &'static str, pub Value);

#[async_trait]
impl Activity for SetVar {
    async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        ctx.set(self.0, self.1.clone());
        Ok(Outcome::Completed)
    }
}

/// Increments the numeric variable `counter`.
#[derive(Debug, Clone)]
pub struct Increment;

#[async_trait]
impl Activity for Increment {
    async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        let current = ctx.get("counter").and_then(Value::as_i64).unwrap_or(0);
        ctx.set("counter", json!(current + 1));
        Ok(Outcome::Completed)
    }
}
