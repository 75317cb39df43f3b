use ethereal_contracts::chat::{extract_directive, Directive, EditIntentClassifier};
use ethereal_contracts::session::{ConversationState, ImageHandle};

/// Image side effect chosen for one assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPlan {
    Generate {
        directive: Directive,
        references: Vec<ImageHandle>,
    },
    Edit {
        base: ImageHandle,
        instruction: String,
    },
    Conversational,
}

impl DispatchPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchPlan::Generate { .. } => "generate",
            DispatchPlan::Edit { .. } => "edit",
            DispatchPlan::Conversational => "conversational",
        }
    }
}

/// A directive in the reply always wins. Otherwise the user's own text is an
/// edit request only when an image already exists and the classifier agrees.
pub fn plan_dispatch(
    reply: &str,
    user_text: &str,
    state: &ConversationState,
    classifier: &dyn EditIntentClassifier,
) -> DispatchPlan {
    if let Some(directive) = extract_directive(reply) {
        return DispatchPlan::Generate {
            directive,
            references: state.reference_photos().to_vec(),
        };
    }
    let Some(latest) = state.assets().latest() else {
        return DispatchPlan::Conversational;
    };
    if classifier.is_edit_request(user_text) {
        return DispatchPlan::Edit {
            base: latest.clone(),
            instruction: user_text.to_string(),
        };
    }
    DispatchPlan::Conversational
}
