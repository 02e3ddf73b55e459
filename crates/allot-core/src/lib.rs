//! # allot-core
//!
//! Data model for context window budgeting.
//!
//! - **Branded IDs**: `ModuleId`, `WindowTypeId`, `SessionId`, `ContentHandle`
//! - **Module registry**: descriptors for each kind of prompt content and the
//!   built-in catalog
//! - **Context Window Types**: per-module budget bounds, condensation order and
//!   dynamic adjustment rules, plus validation into `ValidatedType`
//! - **Turn types**: `TurnContext` in, `TurnBudgetResult` out
//! - **Presets and store**: built-in types and an in-memory
//!   `ContextWindowTypeStore`

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod modules;
pub mod presets;
pub mod store;
pub mod turn;
pub mod validation;
pub mod window_type;

pub use errors::StoreError;
pub use ids::{ContentHandle, ModuleId, SessionId, WindowTypeId};
pub use modules::{ModuleCapabilities, ModuleDescriptor, ModuleRegistry, StaticModuleRegistry};
pub use store::{ContextWindowTypeStore, InMemoryTypeStore};
pub use turn::{ModuleAllocation, RuntimeWarning, TurnBudgetResult, TurnContext};
pub use validation::{ValidatedType, ValidationErrors, Violation, validate};
pub use window_type::{Action, Condition, ContextWindowType, ModuleBudgetConfig, Rule};
