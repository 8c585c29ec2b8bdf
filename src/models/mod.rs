//! Data models for the shop services
//!
//! Entities map one-to-one onto table rows (`sqlx::FromRow`), forms are the
//! JSON bodies accepted by the services and the remaining structs are the
//! shapes services return.

pub mod caller;
pub mod category;
pub mod order;
pub mod payment;
pub mod product;
pub mod promotion;

// Re-export commonly used types for convenience
pub use caller::{Caller, EVERYONE_ROLE};
pub use category::Category;
pub use order::{
    ActiveTimes, CancelOrderForm, CartItem, NewOrder, Order, OrderLine, OrderProductLine,
    OrderStatus, OrderStatusChange, OrderType, PlaceOrderForm, ProductRef, TimeSlot,
    UpdateStatusForm, WhoDeleted, PAYMENT_IN_PROGRESS,
};
pub use payment::{
    CancellationOutcome, CardBrand, CardForm, Customer, FinalizedPayment, PaymentOutcome,
    PendingDebit, VerificationStep,
};
pub use product::{
    CategoryProducts, Product, ProductActivationForm, ProductForm, ProductStatus,
    ProductWithPromotion, SaveImageForm, UpdateProductForm, UpdateStockForm,
};
pub use promotion::{
    ProductPromotion, Promotion, PromotionActivationForm, PromotionForm, PromotionProductForm,
    PromotionStatus, PromotionWithProducts, UpdatePromotionForm,
};
