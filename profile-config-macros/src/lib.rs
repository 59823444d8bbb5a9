//! Proc macros for the profile-config crate.
//!
//! This crate provides the `#[derive(ConfigGroup)]` macro

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Data, DeriveInput, Expr, Fields, Lit, LitStr, Type, parse_macro_input, spanned::Spanned,
};

/// Options parsed from the struct's `#[config(...)]` attribute.
struct GroupOptions {
    group: String,
}

impl GroupOptions {
    fn from_attrs(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut group = None;

        for attr in attrs {
            if attr.path().is_ident("config") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("group") {
                        let value: LitStr = meta.value()?.parse()?;
                        if value.value().is_empty() {
                            return Err(syn::Error::new(value.span(), "group must not be empty"));
                        }
                        group = Some(value.value());
                    } else {
                        return Err(syn::Error::new(
                            meta.path.span(),
                            format!("unknown config attribute: {:?}", meta.path.get_ident()),
                        ));
                    }
                    Ok(())
                })?;
            }
        }

        let group = group.ok_or_else(|| {
            syn::Error::new(
                proc_macro2::Span::call_site(),
                "missing required attribute: #[config(group = \"...\")]",
            )
        })?;

        Ok(Self { group })
    }
}

/// One field with its `#[item(...)]` options.
struct ItemField {
    ident: syn::Ident,
    ty: Type,
    key: String,
    default: Option<Expr>,
}

impl ItemField {
    fn from_field(field: &syn::Field) -> syn::Result<Self> {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "config group fields must be named"))?;
        let mut key = None;
        let mut default = None;

        for attr in &field.attrs {
            if attr.path().is_ident("item") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("key") {
                        let value: LitStr = meta.value()?.parse()?;
                        if value.value().is_empty() || value.value().contains(':') {
                            return Err(syn::Error::new(
                                value.span(),
                                "key must be non-empty and must not contain ':'",
                            ));
                        }
                        key = Some(value.value());
                    } else if meta.path.is_ident("default") {
                        default = Some(meta.value()?.parse::<Expr>()?);
                    } else {
                        return Err(syn::Error::new(
                            meta.path.span(),
                            format!("unknown item attribute: {:?}", meta.path.get_ident()),
                        ));
                    }
                    Ok(())
                })?;
            }
        }

        let key = key.unwrap_or_else(|| ident.to_string());
        let default = default.map(|expr| owned_default(&field.ty, expr));

        Ok(Self {
            ident,
            ty: field.ty.clone(),
            key,
            default,
        })
    }
}

/// `default = "text"` on a `String` field becomes `String::from("text")`.
fn owned_default(ty: &Type, expr: Expr) -> Expr {
    let is_string = matches!(ty, Type::Path(p) if p.path.is_ident("String"));
    match &expr {
        Expr::Lit(lit) if is_string && matches!(lit.lit, Lit::Str(_)) => {
            syn::parse_quote!(::std::string::String::from(#expr))
        }
        _ => expr,
    }
}

/// Derive macro for the `ConfigGroup` trait.
///
/// This macro automatically:
/// - Implements `ConfigGroup` with the group name and one item per field
/// - Reads every field from the manager in `ConfigGroup::load`
/// - Registers the group with `inventory`
///
/// Field types must implement `ConfigValue`. Fields without a `default`
/// must also implement `Default`.
///
/// # Example
///
/// ```rust,ignore
/// use profile_config::ConfigGroup;
///
/// #[derive(Debug, ConfigGroup)]
/// #[config(group = "grandexchange")]
/// struct GrandExchangeConfig {
///     #[item(key = "quickLookup", default = true)]
///     quick_lookup: bool,
///     #[item(default = "osrs")]
///     wiki: String,
/// }
/// ```
///
/// This expands to roughly:
///
/// ```rust,ignore
/// impl profile_config::ConfigGroup for GrandExchangeConfig {
///     const GROUP: &'static str = "grandexchange";
///
///     fn items() -> Vec<profile_config::ConfigItem> { /* quickLookup, wiki */ }
///
///     fn load(manager: &profile_config::ConfigManager) -> Self {
///         Self {
///             quick_lookup: manager
///                 .get::<bool>("grandexchange", "quickLookup")
///                 .unwrap_or_else(|| true),
///             // ...
///         }
///     }
/// }
///
/// inventory::submit! {
///     profile_config::RegisteredGroup::new::<GrandExchangeConfig>()
/// }
/// ```
#[proc_macro_derive(ConfigGroup, attributes(config, item))]
pub fn derive_config_group(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_config_group_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_config_group_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let options = GroupOptions::from_attrs(&input.attrs)?;
    let name = &input.ident;
    let group = &options.group;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .map(ItemField::from_field)
                .collect::<syn::Result<Vec<_>>>()?,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "ConfigGroup needs a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "ConfigGroup can only be derived for structs",
            ));
        }
    };

    let items = fields.iter().map(|field| {
        let ty = &field.ty;
        let key = &field.key;
        let default = match &field.default {
            Some(expr) => quote! {
                ::std::option::Option::Some(
                    <#ty as ::profile_config::ConfigValue>::to_config_string(&(#expr))
                )
            },
            None => quote! { ::std::option::Option::None },
        };
        quote! {
            ::profile_config::ConfigItem {
                key: #key,
                default: #default,
                is_valid: |value| {
                    <#ty as ::profile_config::ConfigValue>::from_config_str(value).is_ok()
                },
            }
        }
    });

    let loads = fields.iter().map(|field| {
        let ident = &field.ident;
        let ty = &field.ty;
        let key = &field.key;
        let fallback = match &field.default {
            Some(expr) => quote! { .unwrap_or_else(|| #expr) },
            None => quote! { .unwrap_or_default() },
        };
        quote! {
            #ident: manager.get::<#ty>(#group, #key) #fallback
        }
    });

    Ok(quote! {
        impl ::profile_config::ConfigGroup for #name {
            const GROUP: &'static str = #group;

            fn items() -> ::std::vec::Vec<::profile_config::ConfigItem> {
                ::std::vec![#(#items),*]
            }

            fn load(manager: &::profile_config::ConfigManager) -> Self {
                Self {
                    #(#loads),*
                }
            }
        }

        ::profile_config::inventory::submit! {
            ::profile_config::RegisteredGroup::new::<#name>()
        }
    })
}
