pub mod code_action;
pub mod completion;
pub mod definition;
pub mod diagnostics;
pub mod selection_range;
