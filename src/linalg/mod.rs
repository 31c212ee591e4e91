pub mod cholesky;
pub mod vector_ops;
