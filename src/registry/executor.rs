//! Method invocation wrapper
//!
//! The executor is the single path through which registered callables run:
//! input-style validation first, then the call itself with metrics
//! recorded on both outcomes.

use std::sync::Arc;
use std::time::Instant;

use crate::error::ExecError;
use crate::registry::metrics::MetricsRecorder;
use crate::registry::record::MethodRecord;
use crate::settings::InputStyle;
use crate::value::{Params, Value};

pub struct MethodExecutor {
    metrics: Arc<MetricsRecorder>,
    input_style: InputStyle,
}

impl MethodExecutor {
    pub fn new(metrics: Arc<MetricsRecorder>, input_style: InputStyle) -> MethodExecutor {
        MethodExecutor {
            metrics,
            input_style,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Invoke a record with bound parameters.
    pub fn execute(&self, record: &MethodRecord, args: Params) -> Result<Value, ExecError> {
        self.validate_input_style(record, &args)?;

        let full_key = record.full_key();
        let start = Instant::now();
        match record.callable.invoke(args) {
            Ok(value) => {
                self.metrics.record_success(&full_key, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                let message = err.to_string();
                self.metrics
                    .record_error(&full_key, start.elapsed(), &message);
                Err(ExecError::Execution {
                    method: record.method_name.clone(),
                    message,
                })
            }
        }
    }

    /// Catch the common ambiguity where a caller passes `[x]` meaning one
    /// element but the callee expected `x`. The check looks at the value
    /// bound to the first declared parameter.
    fn validate_input_style(&self, record: &MethodRecord, args: &Params) -> Result<(), ExecError> {
        if self.input_style == InputStyle::AllowList {
            return Ok(());
        }
        let Some(first) = record.callable.parameters().first() else {
            return Ok(());
        };
        let Some(bound) = args.get(&first.name) else {
            return Ok(());
        };

        match self.input_style {
            InputStyle::StrictSingle => {
                if matches!(bound, Value::List(_)) && !first.collection && args.len() == 1 {
                    return Err(ExecError::InputStyle {
                        method: record.method_name.clone(),
                        message: format!(
                            "parameter '{}' received a list but is not a collection; \
                             pass the element directly or set INPUT_STYLE=allow_list",
                            first.name
                        ),
                    });
                }
            }
            InputStyle::EnforceList => {
                if !matches!(bound, Value::List(_)) {
                    return Err(ExecError::InputStyle {
                        method: record.method_name.clone(),
                        message: format!(
                            "parameter '{}' must be a list under enforce_list (got {})",
                            first.name,
                            bound.type_tag()
                        ),
                    });
                }
            }
            InputStyle::AllowList => {}
        }
        Ok(())
    }
}
