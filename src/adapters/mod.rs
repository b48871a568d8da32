pub mod in_memory;
pub mod postgres_payment_method_repository;
pub mod postgres_tenant_repository;
pub mod postgres_transaction_repository;

pub use in_memory::{
    InMemoryPaymentMethodRepository, InMemoryTenantRepository, InMemoryTransactionRepository,
};
pub use postgres_payment_method_repository::PostgresPaymentMethodRepository;
pub use postgres_tenant_repository::PostgresTenantRepository;
pub use postgres_transaction_repository::PostgresTransactionRepository;
