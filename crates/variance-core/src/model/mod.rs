//! Domain model: witnesses, sets, annotations and alignments.

mod alignment;
mod annotation;
mod range;
mod set;

pub use alignment::{
    AlignedAnnotation, Alignment, AlignmentClass, AlignmentFilter, AlignmentId, AlignmentName,
    NewAlignment,
};
pub use annotation::{Annotation, AnnotationId, AnnotationKind, NewAnnotation};
pub use range::{Range, exclude};
pub use set::{
    ComparisonSet, InvalidTransition, ParseStatusError, SetId, SetStatus, Witness, WitnessId,
};
