//! The agentdeck orchestration core.
//!
//! An [`AgentDeck`] drives agents through the tool-calling loop:
//!
//! 1. **Run** the agent with forwarded properties, visible tools and context
//! 2. **Execute** every unresolved tool call against the registered
//!    frontend tools and splice the results into the conversation
//! 3. **Follow up** with another run while tools ask for one
//! 4. **Suggest** next user messages once the turn settles, by running
//!    cloned provider agents in the background
//!
//! Alongside the loop the deck keeps a run-indexed history of agent state
//! and message provenance, and a registry of local and runtime-discovered
//! agents.

pub mod agent_registry;
pub mod context_store;
pub mod deck;
pub mod facade;
pub mod partial_json;
pub mod run_handler;
pub mod state_manager;
pub mod suggestion_engine;

pub use agent_registry::AgentRegistry;
pub use context_store::ContextStore;
pub use deck::{AgentDeck, DeckOptions};
pub use facade::CoreFacade;
pub use partial_json::parse_partial;
pub use run_handler::RunHandler;
pub use state_manager::StateManager;
pub use suggestion_engine::{SUGGEST_TOOL_NAME, SuggestionEngine, SuggestionsSnapshot, suggest_tool};
