//! Interactive selection and forms.
//!
//! Commands only ever talk to a [`Prompter`]; the terminal implementation
//! lives in [`TerminalPrompter`].

use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use fleet_shared::{
    application::Application,
    manifest::{ConfigOption, OptionKind},
};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::{drive::DriveCandidate, error::ProvisionError};

pub trait Prompter: Send + Sync {
    /// Pick an application by name.
    fn select_application(&self, applications: &[Application]) -> Result<String, ProvisionError>;

    fn select_drive(
        &self,
        message: &str,
        drives: &[DriveCandidate],
    ) -> Result<PathBuf, ProvisionError>;

    /// Ask every option, keyed by option name.
    fn ask_options(&self, options: &[&ConfigOption]) -> Result<Map<String, Value>, ProvisionError>;

    fn confirm(&self, message: &str) -> Result<bool, ProvisionError>;

    fn input(&self, message: &str) -> Result<String, ProvisionError>;
}

pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

fn prompt_failed(e: dialoguer::Error) -> ProvisionError {
    ProvisionError::io("prompt failed", std::io::Error::other(e.to_string()))
}

impl TerminalPrompter {
    fn ask_option(&self, option: &ConfigOption) -> Result<Value, ProvisionError> {
        let message = if option.message.is_empty() {
            option.name.as_str()
        } else {
            option.message.as_str()
        };

        match option.kind {
            OptionKind::Boolean => {
                let default = option
                    .default
                    .as_ref()
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Confirm::with_theme(&self.theme)
                    .with_prompt(message)
                    .default(default)
                    .interact()
                    .map(Value::Bool)
                    .map_err(prompt_failed)
            }
            OptionKind::List => {
                let default = option
                    .default
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|d| option.choices.iter().position(|c| c == d))
                    .unwrap_or(0);
                let index = Select::with_theme(&self.theme)
                    .with_prompt(message)
                    .items(&option.choices)
                    .default(default)
                    .interact()
                    .map_err(prompt_failed)?;
                Ok(Value::String(option.choices[index].clone()))
            }
            OptionKind::Number => {
                let mut input = Input::<String>::with_theme(&self.theme)
                    .with_prompt(message)
                    .validate_with(|v: &String| -> Result<(), &'static str> {
                        parse_number(v).map(|_| ()).ok_or("not a number")
                    });
                if let Some(default) = &option.default {
                    input = input.default(default.to_string());
                }
                let raw = input.interact_text().map_err(prompt_failed)?;
                parse_number(&raw)
                    .ok_or_else(|| ProvisionError::UserInput(format!("{} is not a number", raw)))
            }
            OptionKind::Text => {
                let mut input = Input::<String>::with_theme(&self.theme).with_prompt(message);
                if let Some(default) = option.default.as_ref().and_then(Value::as_str) {
                    input = input.default(default.to_string());
                }
                input
                    .allow_empty(true)
                    .interact_text()
                    .map(Value::String)
                    .map_err(prompt_failed)
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn select_application(&self, applications: &[Application]) -> Result<String, ProvisionError> {
        if applications.is_empty() {
            return Err(ProvisionError::UserInput(
                "You don't have any applications".to_string(),
            ));
        }
        let items: Vec<String> = applications
            .iter()
            .map(|a| format!("{} ({})", a.name, a.device_type))
            .collect();
        let index = Select::with_theme(&self.theme)
            .with_prompt("Select an application")
            .items(&items)
            .default(0)
            .interact()
            .map_err(prompt_failed)?;
        Ok(applications[index].name.clone())
    }

    fn select_drive(
        &self,
        message: &str,
        drives: &[DriveCandidate],
    ) -> Result<PathBuf, ProvisionError> {
        if drives.is_empty() {
            return Err(ProvisionError::UserInput(
                "No available drives were detected".to_string(),
            ));
        }
        let items: Vec<String> = drives.iter().map(DriveCandidate::describe).collect();
        let index = Select::with_theme(&self.theme)
            .with_prompt(message)
            .items(&items)
            .default(0)
            .interact()
            .map_err(prompt_failed)?;
        Ok(drives[index].path.clone())
    }

    fn ask_options(&self, options: &[&ConfigOption]) -> Result<Map<String, Value>, ProvisionError> {
        let mut answers = Map::new();
        for option in options {
            answers.insert(option.name.clone(), self.ask_option(option)?);
        }
        Ok(answers)
    }

    fn confirm(&self, message: &str) -> Result<bool, ProvisionError> {
        Confirm::with_theme(&self.theme)
            .with_prompt(message)
            .default(false)
            .interact()
            .map_err(prompt_failed)
    }

    fn input(&self, message: &str) -> Result<String, ProvisionError> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(message)
            .interact_text()
            .map_err(prompt_failed)
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}
