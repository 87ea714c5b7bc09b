use serde::Serialize;
use serde_json::Value;

use super::{Context, FinishStep, Function, ParameterBag, Step};

/// Answer one `(function, params)` call addressed to `step`.
///
/// `Info` yields the step metadata, `Write` a boolean. An unknown function
/// is logged and answered with `None`; it never takes the caller down. A
/// `Write` that errors out is logged and reported as `false`.
#[tracing::instrument(skip(params, context))]
pub fn call(step: Step, function: &str, params: &ParameterBag, context: &Context) -> Option<Value> {
    tracing::info!("starting {step}");
    tracing::debug!(?params);

    let ret = match function.parse::<Function>() {
        Ok(Function::Info) => serde_json::to_value(step.info())
            .inspect_err(|e| tracing::error!(?e, "cannot serialize step info"))
            .ok(),
        Ok(Function::Write) => Some(Value::Bool(step.write(context, params).unwrap_or_else(
            |e| {
                tracing::error!("{step} failed: {e:?}");
                false
            },
        ))),
        Err(e) => {
            tracing::error!("{e}");
            None
        }
    };

    tracing::debug!(?ret);
    tracing::info!("{step} finished");
    ret
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// The step ran and reported `false`.
    Failed,
    /// The step stopped with an error.
    Errored(String),
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Sum of the progress units of every selected step.
    pub total_steps: u32,
    pub outcomes: Vec<(String, StepOutcome)>,
}

impl RunSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| *outcome == StepOutcome::Succeeded)
    }
}

/// Run `steps` in the given order, skipping those that do not apply to the
/// installation mode. A failing step is logged and the run goes on.
#[tracing::instrument(skip(context), fields(mode = ?context.mode))]
pub fn run_steps(steps: &[Step], context: &Context) -> RunSummary {
    let selected = steps
        .iter()
        .map(|step| (*step, step.info()))
        .filter(|(step, info)| {
            let applies = info.applies_to(context.mode);
            if !applies {
                tracing::debug!("{step} does not apply to {:?}", context.mode);
            }
            applies
        })
        .collect::<Vec<_>>();

    let total_steps = selected.iter().map(|(_, info)| info.steps).sum();
    let mut summary = RunSummary {
        total_steps,
        outcomes: Vec::with_capacity(selected.len()),
    };

    let mut done = 0;
    for (step, info) in selected {
        if let Some(title) = info.title {
            tracing::info!(done, total = total_steps, "{title}");
        }
        let outcome = match step.write(context, &ParameterBag::default()) {
            Ok(true) => StepOutcome::Succeeded,
            Ok(false) => {
                tracing::warn!("{step} did not succeed");
                StepOutcome::Failed
            }
            Err(e) => {
                tracing::error!("{step} failed: {e:?}");
                StepOutcome::Errored(format!("{e:#}"))
            }
        };
        summary.outcomes.push((step.name().to_owned(), outcome));
        done += info.steps;
    }
    tracing::info!(done, total = total_steps, "All finish steps done");
    summary
}
