//! Supervisor tests over in-process fake children.
