//! Structural checks a bake file must pass beyond plain syntax: known block
//! types, the right number of labels and known, unique attribute names.

use std::collections::HashMap;

use crate::hcl::{Block, Body, File};
use crate::schema::{self, BlockSchema};
use crate::ParseError;

/// Run every structural check over a parsed file.
#[must_use]
pub fn validate(file: &File) -> Vec<ParseError> {
    let mut errors = Vec::new();
    duplicate_attributes(&file.body, &mut errors);
    for block in &file.body.blocks {
        match schema::root_block(&block.kind) {
            Some(schema) => validate_block(block, schema, &mut errors),
            None => errors.push(ParseError::at(
                "Unsupported block type",
                format!("Blocks of type \"{}\" are not expected here.", block.kind),
                &block.kind_location,
            )),
        }
    }
    errors
}

fn validate_block(block: &Block, schema: &BlockSchema, errors: &mut Vec<ParseError>) {
    let expected = schema.labels.len();
    if block.labels.len() < expected {
        let missing = schema.labels.get(block.labels.len()).copied().unwrap_or_default();
        errors.push(ParseError::at(
            &format!("Missing name for {}", block.kind),
            format!(
                "All {} blocks must have {expected} labels ({missing}).",
                block.kind
            ),
            &block.kind_location,
        ));
    } else if let Some(extra) = block.labels.get(expected) {
        let subject = block
            .labels
            .last()
            .map_or_else(|| extra.location.clone(), |last| extra.location.to(&last.location));
        errors.push(ParseError::at(
            &format!("Extraneous label for {}", block.kind),
            format!(
                "Only {expected} labels ({}) are expected for {} blocks.",
                schema.labels.join(", "),
                block.kind
            ),
            &subject,
        ));
    }

    duplicate_attributes(&block.body, errors);
    for attribute in &block.body.attributes {
        if schema.attribute(&attribute.name).is_none() {
            errors.push(ParseError::at(
                "Unsupported argument",
                format!("An argument named \"{}\" is not expected here.", attribute.name),
                &attribute.name_location,
            ));
        }
    }
    for nested in &block.body.blocks {
        match schema.block(&nested.kind) {
            Some(nested_schema) => validate_block(nested, nested_schema, errors),
            None => errors.push(ParseError::at(
                "Unsupported block type",
                format!("Blocks of type \"{}\" are not expected here.", nested.kind),
                &nested.kind_location,
            )),
        }
    }
}

fn duplicate_attributes(body: &Body, errors: &mut Vec<ParseError>) {
    let mut seen = HashMap::new();
    for attribute in &body.attributes {
        if let Some(first) = seen.insert(attribute.name.as_str(), &attribute.name_location) {
            // Keep pointing at the first definition.
            seen.insert(attribute.name.as_str(), first);
            errors.push(ParseError::at(
                "Duplicate argument",
                format!(
                    "The argument \"{}\" was already set at {}:{}.",
                    attribute.name, first.start.line, first.start.column
                ),
                &attribute.name_location,
            ));
        }
    }
}
