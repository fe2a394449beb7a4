use colored::*;
use grapple_core::prost_reflect::MethodDescriptor;
use std::fmt::Display;

/// A wrapper struct for a formatted, possibly colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// Methods as printed by `ls` (`long == false`) and `ll` (`long == true`).
pub struct MethodList {
    pub methods: Vec<MethodDescriptor>,
    pub long: bool,
}

/// The final error of a run, with its chain of causes.
pub struct ErrorReport<'a>(pub &'a anyhow::Error);

pub struct Warning<T: Display>(pub T);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<MethodList> for FormattedString {
    fn from(MethodList { methods, long }: MethodList) -> Self {
        let lines: Vec<String> = methods
            .iter()
            .map(|method| {
                if long {
                    signature(method)
                } else {
                    method.full_name().to_string()
                }
            })
            .collect();

        FormattedString(lines.join("\n"))
    }
}

/// `rpc pkg.Service.Method(stream pkg.In) returns (stream pkg.Out)`
fn signature(method: &MethodDescriptor) -> String {
    let stream = |streaming: bool| if streaming { "stream " } else { "" };

    format!(
        "rpc {}({}{}) returns ({}{})",
        method.full_name(),
        stream(method.is_client_streaming()),
        method.input().full_name(),
        stream(method.is_server_streaming()),
        method.output().full_name()
    )
}

impl From<ErrorReport<'_>> for FormattedString {
    fn from(ErrorReport(err): ErrorReport<'_>) -> Self {
        FormattedString(format!("{} {:#}", "Error:".red().bold(), err))
    }
}

impl<T: Display> From<Warning<T>> for FormattedString {
    fn from(Warning(msg): Warning<T>) -> Self {
        FormattedString(format!("{} {}", "warning:".yellow().bold(), msg))
    }
}
