//! A derive macro for the `Event` trait in the `eventvault` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitInt, LitStr, parse_macro_input};

/// Values read from `#[event(...)]` attributes.
#[derive(Default)]
struct EventAttrs {
    name: Option<String>,
    version: Option<u16>,
}

fn parse_attrs(attrs: &[Attribute]) -> syn::Result<EventAttrs> {
    let mut parsed = EventAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("version") {
                let lit: LitInt = meta.value()?.parse()?;
                parsed.version = Some(lit.base10_parse()?);
                Ok(())
            } else if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                parsed.name = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("expected `version = <u16>` or `name = \"...\"`"))
            }
        })?;
    }
    Ok(parsed)
}

/// Derives the `Event` trait for an enum.
///
/// - `event_type` returns the variant name, or the `#[event(name = "...")]`
///   override on the variant.
/// - `event_version` returns `#[event(version = N)]` from the variant, else
///   from the enum, else 1.
/// - `event_types` lists every tag, for handler registration.
#[proc_macro_derive(Event, attributes(event))]
pub fn event_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Event derive macro can only be used on enums",
            ));
        }
    };

    let enum_attrs = parse_attrs(&input.attrs)?;
    if let Some(tag) = &enum_attrs.name {
        return Err(syn::Error::new_spanned(
            name,
            format!("`name = {tag:?}` belongs on a variant, not on the enum"),
        ));
    }
    let default_version = enum_attrs.version.unwrap_or(1);

    let mut type_arms = Vec::new();
    let mut version_arms = Vec::new();
    let mut tags = Vec::new();
    for variant in variants {
        let variant_name = &variant.ident;
        let attrs = parse_attrs(&variant.attrs)?;
        let tag = attrs.name.unwrap_or_else(|| variant_name.to_string());
        if tags.contains(&tag) {
            return Err(syn::Error::new_spanned(
                variant_name,
                format!("event type `{tag}` is used by more than one variant"),
            ));
        }
        let version = attrs.version.unwrap_or(default_version);
        let fields = match &variant.fields {
            Fields::Named(_) => quote! { { .. } },
            Fields::Unnamed(_) => quote! { (..) },
            Fields::Unit => quote! {},
        };
        type_arms.push(quote! { #name::#variant_name #fields => #tag });
        version_arms.push(quote! { #name::#variant_name #fields => #version });
        tags.push(tag);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics eventvault::Event for #name #ty_generics #where_clause {
            fn event_type(&self) -> &'static str {
                match self {
                    #(#type_arms),*
                }
            }

            fn event_version(&self) -> u16 {
                match self {
                    #(#version_arms),*
                }
            }

            fn event_types() -> &'static [&'static str] {
                &[#(#tags),*]
            }
        }
    })
}
