// src/xt/parser.rs
// Drive one extension through a rule's argument vector

use super::Extension;
use super::options::{OptionCall, OptionFlags, OptionValue};
use crate::exceptions::{Result, XtError};
use log::debug;

/// Feed `[!] --name [arg]` / `--name=arg` tokens to `ext`, then run its
/// final check. Returns the options that were seen.
pub fn parse_args<S: AsRef<str>>(ext: &mut dyn Extension, args: &[S]) -> Result<OptionFlags> {
    let extension = ext.name();
    let revision = ext.revision();
    let table = ext.options();
    let mut flags = OptionFlags::default();
    let mut invert = false;
    let mut tokens = args.iter().map(AsRef::as_ref);

    while let Some(token) = tokens.next() {
        if token == "!" {
            if invert {
                return Err(XtError::Generic(format!(
                    "{extension}: multiple \"!\" flags not allowed"
                )));
            }
            invert = true;
            continue;
        }

        let Some(body) = token.strip_prefix("--") else {
            return Err(XtError::UnknownOption {
                extension,
                option: token.to_string(),
            });
        };
        let (name, inline_arg) = match body.split_once('=') {
            Some((name, arg)) => (name, Some(arg)),
            None => (body, None),
        };

        let entry = table
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| XtError::UnknownOption {
                extension,
                option: token.to_string(),
            })?;

        flags.check(extension, entry, table)?;

        if invert && !entry.invertible {
            return Err(XtError::CannotInvert {
                extension,
                option: entry.name,
            });
        }

        let arg = if entry.takes_argument() {
            let arg = inline_arg.or_else(|| tokens.next());
            Some(arg.ok_or(XtError::MissingArgument {
                extension,
                option: entry.name,
            })?)
        } else if inline_arg.is_some() {
            return Err(XtError::BadValue {
                extension,
                option: entry.name,
                message: format!("option \"--{}\" doesn't allow an argument", entry.name),
            });
        } else {
            None
        };

        let call = OptionCall {
            extension,
            revision,
            entry,
            arg,
            value: OptionValue::parse(extension, entry, arg)?,
            invert,
        };
        debug!(
            "📋 {}.{}: {}--{} {}",
            extension,
            revision,
            if invert { "! " } else { "" },
            entry.name,
            call.arg()
        );

        ext.parse(&call)?;
        flags.set(entry);
        invert = false;
    }

    if invert {
        return Err(XtError::Generic(format!(
            "{extension}: \"!\" is not followed by an option"
        )));
    }

    ext.final_check(flags)?;
    Ok(flags)
}
